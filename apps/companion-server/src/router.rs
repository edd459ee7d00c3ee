use std::mem;

use axum::{handler::Handler, routing::get, Extension, Router};

use crate::api::{self, RouteVersion};
use crate::AppState;

/// Versions every content route is mounted under.
pub(crate) const ROUTE_VERSIONS: [&str; 2] = ["v1", "v2"];

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: 'static,
    {
        self.endpoints.push(format!("GET {path}"));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const ROOT: &str = "/";
    pub const HEARTBEAT: &str = "/heartbeat";
    pub const VERSION: &str = "/version";
    pub const DEVICE_AUTHENTICATE: &str = "/device_authenticate";
    pub const LIST_APPLICATIONS: &str = "/list_applications";
    pub const APPLICATION_ICON: &str = "/application_icon";
    pub const LIST_APPLICATION_SETS: &str = "/list_application_sets";
    pub const LIST_APPLICATION_CONTENT_FOR_TAGS: &str = "/list_application_content_for_tags";
    pub const CONTENT_DATA: &str = "/content_data";
    pub const CONTENT_METADATA: &str = "/content_metadata";
    pub const SEARCH_CONTENT: &str = "/search_content";
    pub const RESOURCE: &str = "/resource";
    pub const LICENSE: &str = "/license";
}

/// Unversioned routes plus one nested copy of the content routes per
/// version. Returns the router and the `METHOD path` of every endpoint.
pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::ROOT, api::meta::root)
        .route_get(paths::HEARTBEAT, api::meta::heartbeat)
        .route_get(paths::VERSION, api::meta::version);
    let (mut router, mut endpoints) = builder.build();

    for version in ROUTE_VERSIONS {
        let mut versioned = RouterBuilder::new();
        register_content_routes(&mut versioned);
        let (routes, names) = versioned.build();
        let prefix = format!("/{version}");
        endpoints.extend(
            names
                .into_iter()
                .map(|name| name.replacen("GET ", &format!("GET {prefix}"), 1)),
        );
        router = router.nest(&prefix, routes.layer(Extension(RouteVersion(version))));
    }

    (router.fallback(api::meta::not_found), endpoints)
}

fn register_content_routes(builder: &mut RouterBuilder) {
    builder
        .route_get(paths::HEARTBEAT, api::meta::heartbeat)
        .route_get(paths::DEVICE_AUTHENTICATE, api::meta::device_authenticate)
        .route_get(paths::LIST_APPLICATIONS, api::applications::list_applications)
        .route_get(paths::APPLICATION_ICON, api::applications::application_icon)
        .route_get(paths::LIST_APPLICATION_SETS, api::applications::list_application_sets)
        .route_get(
            paths::LIST_APPLICATION_CONTENT_FOR_TAGS,
            api::applications::list_application_content_for_tags,
        )
        .route_get(paths::CONTENT_DATA, api::content::content_data)
        .route_get(paths::CONTENT_METADATA, api::content::content_metadata)
        .route_get(paths::SEARCH_CONTENT, api::search::search_content)
        .route_get(paths::RESOURCE, api::resources::resource)
        .route_get(paths::LICENSE, api::resources::license);
}
