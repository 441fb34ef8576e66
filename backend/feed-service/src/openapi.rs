use utoipa::openapi::path::{
    HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, PathItem,
};
use utoipa::openapi::{InfoBuilder, OpenApi, OpenApiBuilder, PathsBuilder, Required, ResponseBuilder};

fn query_param(name: &str, description: &str) -> utoipa::openapi::path::Parameter {
    ParameterBuilder::new()
        .name(name)
        .parameter_in(ParameterIn::Query)
        .required(Required::False)
        .description(Some(description))
        .build()
}

fn get_feed_operation() -> utoipa::openapi::path::Operation {
    OperationBuilder::new()
        .operation_id(Some("get_feed"))
        .summary(Some("Page of a user's feed, newest first"))
        .parameter(
            ParameterBuilder::new()
                .name("id")
                .parameter_in(ParameterIn::Path)
                .required(Required::True)
                .description(Some("User id (UUID)"))
                .build(),
        )
        .parameter(query_param("page", "1-based page number, default 1"))
        .parameter(query_param("limit", "Page size, default 10. Capped only when FEED_MAX_PAGE_LIMIT is set"))
        .response(
            "200",
            ResponseBuilder::new().description("{posts, page, limit}").build(),
        )
        .response(
            "400",
            ResponseBuilder::new()
                .description("Malformed id, page or limit")
                .build(),
        )
        .response("404", ResponseBuilder::new().description("Unknown user").build())
        .response(
            "500",
            ResponseBuilder::new().description("Store or cache failure").build(),
        )
        .response(
            "504",
            ResponseBuilder::new()
                .description("Request deadline exceeded")
                .build(),
        )
        .build()
}

/// OpenAPI document of the feed endpoint.
pub fn doc() -> OpenApi {
    OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title("Feed Service API")
                .version(env!("CARGO_PKG_VERSION"))
                .description(Some(
                    "Personalized reverse-chronological feeds with push fanout and a response cache.",
                ))
                .build(),
        )
        .paths(
            PathsBuilder::new()
                .path(
                    "/feeds/{id}",
                    PathItem::new(HttpMethod::Get, get_feed_operation()),
                )
                .build(),
        )
        .build()
}
