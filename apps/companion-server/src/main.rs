use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{error, info, warn};

mod access_log;
mod api;
mod app_state;
mod bootstrap;
mod config;
mod keepalive;
mod library_watcher;
mod lifecycle;
mod responses;
mod router;
mod streaming;
mod tasks;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

use keepalive::KeepAlive;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    companion_otel::init();

    let config = match config::ServerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let bootstrap::BootstrapOutput {
        router,
        state,
        background_tasks,
    } = bootstrap::build(&config)?;

    let keep_alive = state.keep_alive().clone();
    let inactivity_timeout = state.inactivity_timeout();
    let app = bootstrap::assemble(router, state, config.http.concurrency_limit);

    let listener = tokio::net::TcpListener::bind(config.http.addr)
        .await
        .with_context(|| format!("binding {}", config.http.addr))?;
    info!(addr = %config.http.addr, tasks = background_tasks.len(), "companion server listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(keep_alive, inactivity_timeout));

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!("shutting down background tasks");
    background_tasks
        .shutdown_with_grace(Duration::from_secs(5))
        .await;
    Ok(())
}

async fn shutdown_signal(keep_alive: KeepAlive, inactivity_timeout: Option<Duration>) {
    info!("shutdown signal listener active");
    let idle = async {
        match inactivity_timeout {
            Some(timeout) => keep_alive.idle_for(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = os_signal() => info!("shutdown signal received"),
        _ = idle => info!("inactivity timeout reached"),
    }
}

async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable; listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod http_tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use companion_core::adjust::WRAPPER_MARKER;
    use companion_core::test_support::{article, listing};
    use companion_core::QueryError;
    use http_body_util::BodyExt;
    use serde_json::json;
    use test_support::{body_bytes, body_json, TestApp};

    const DATA: &str = "/v1/content_data?deviceUUID=dev&applicationId=com.example.App&contentId=c1";

    fn app_with_text(data: &str) -> TestApp {
        let t = TestApp::new(Some(Duration::from_secs(30)));
        t.library.add_source(listing("com.example.App", "Example"));
        t.library.add_content(
            "com.example.App",
            "c1",
            json!({ "contentType": "text/plain", "title": "Plain" }),
            data.to_string(),
        );
        t
    }

    #[tokio::test]
    async fn content_data_without_range_is_whole() {
        let t = app_with_text("0123456789");
        let response = t.get(DATA).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[lifecycle::ALIVE_FOR_FURTHER], "30000");
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(&body_bytes(response).await[..], b"0123456789");
        assert_eq!(t.state.keep_alive().active(), 0);
        assert_eq!(t.state.keep_alive().released_total(), 1);
    }

    #[tokio::test]
    async fn content_data_honours_ranges() {
        let t = app_with_text("0123456789");
        let response = t.get_range(DATA, "bytes=4-").await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 4-9/10");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "6");
        assert_eq!(&body_bytes(response).await[..], b"456789");
    }

    #[tokio::test]
    async fn content_data_rejects_unsatisfiable_ranges() {
        let t = app_with_text("0123456789");
        let response = t.get_range(DATA, "bytes=50-60").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert_eq!(t.state.keep_alive().active(), 0);
    }

    #[tokio::test]
    async fn lookup_failures_use_the_error_envelope() {
        let t = app_with_text("x");
        let response = t
            .get("/v1/content_data?deviceUUID=dev&applicationId=com.example.Missing&contentId=c1")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "INVALID_APP_ID");
        assert_eq!(body["error"]["domain"], companion_protocol::ERROR_DOMAIN);

        let body = body_json(
            t.get("/v1/content_data?deviceUUID=dev&applicationId=com.example.App&contentId=nope")
                .await,
        )
        .await;
        assert_eq!(body["error"]["code"], "INVALID_CONTENT_ID");
        assert_eq!(body["error"]["detail"]["contentId"], "nope");
    }

    #[tokio::test]
    async fn missing_params_fail_fast() {
        let t = app_with_text("x");
        let body = body_json(
            t.get("/v2/content_data?deviceUUID=dev&applicationId=com.example.App")
                .await,
        )
        .await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert_eq!(body["error"]["detail"]["missing_querystring_param"], "contentId");
        assert_eq!(t.state.keep_alive().active(), 0);
    }

    #[tokio::test]
    async fn unknown_routes_are_404_envelopes() {
        let t = TestApp::new(None);
        let response = t.get("/v1/does_not_exist").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(lifecycle::ALIVE_FOR_FURTHER).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["detail"]["invalid_path"], "/v1/does_not_exist");
    }

    #[tokio::test]
    async fn heartbeat_and_version_are_unversioned() {
        let t = TestApp::new(None);
        assert_eq!(body_json(t.get("/heartbeat").await).await, json!({ "status": "ok" }));
        let body = body_json(t.get("/version").await).await;
        assert_eq!(body["payload"]["version"], companion_protocol::SERVER_API_VERSION);
        let body = body_json(t.get("/v2/device_authenticate?deviceUUID=dev").await).await;
        assert_eq!(body, json!({ "status": "ok", "error": null }));
    }

    #[tokio::test]
    async fn dropped_stream_finishes_and_releases_once() {
        let payload = "x".repeat(256 * 1024);
        let t = app_with_text(&payload);
        let response = t.get(DATA).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(t.state.keep_alive().active(), 1);

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert!(!first.into_data().unwrap().is_empty());
        drop(body);

        assert_eq!(t.state.keep_alive().active(), 0);
        assert_eq!(t.state.keep_alive().released_total(), 1);
    }

    #[tokio::test]
    async fn abandoned_request_releases_its_hold_once() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.App", "Example"));
        t.library.set_query_delay(Duration::from_secs(60));

        let mut pending = Box::pin(t.get("/v1/search_content?deviceUUID=dev&searchTerm=x"));
        tokio::select! {
            _ = &mut pending => panic!("search answered before the backend did"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(t.state.keep_alive().active(), 1);

        drop(pending);
        assert_eq!(t.state.keep_alive().active(), 0);
        assert_eq!(t.state.keep_alive().released_total(), 1);
    }

    #[tokio::test]
    async fn html_is_wrapped_unless_pre_templated() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.App", "Example"));
        t.library.add_content(
            "com.example.App",
            "page",
            json!({ "contentType": "text/html", "title": "Page" }),
            "<p>raw body</p>",
        );
        t.library.add_content(
            "com.example.App",
            "templated",
            json!({ "contentType": "text/html", "title": "Done", "isServerTemplated": true }),
            "<p>already templated</p>",
        );

        let response = t
            .get("/v1/content_data?deviceUUID=dev&applicationId=com.example.App&contentId=page")
            .await;
        let length: usize = response.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let wrapped = body_bytes(response).await;
        assert_eq!(wrapped.len(), length);
        let wrapped = String::from_utf8(wrapped.to_vec()).unwrap();
        assert!(wrapped.contains(WRAPPER_MARKER));
        assert!(wrapped.contains("<p>raw body</p>"));

        let plain = body_bytes(
            t.get("/v1/content_data?deviceUUID=dev&applicationId=com.example.App&contentId=templated")
                .await,
        )
        .await;
        assert_eq!(&plain[..], b"<p>already templated</p>");
    }

    #[tokio::test]
    async fn content_metadata_reports_runtime_version() {
        let t = app_with_text("x");
        t.library.set_runtime_version("com.example.App", 5);
        let body = body_json(
            t.get("/v1/content_metadata?deviceUUID=dev&applicationId=com.example.App&contentId=c1")
                .await,
        )
        .await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["payload"]["title"], "Plain");
        assert_eq!(body["payload"]["version"], 5);
    }

    #[tokio::test]
    async fn search_cuts_the_global_window_after_merging() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.A", "Alpha"));
        t.library.add_source(listing("com.example.B", "Beta"));
        t.library.set_query_results(
            "com.example.A",
            Ok(vec![article("a1", "a1"), article("a2", "a2"), article("a3", "a3")]),
        );
        t.library.set_query_results(
            "com.example.B",
            Ok(vec![article("b1", "b1"), article("b2", "b2")]),
        );

        let body = body_json(
            t.get("/v2/search_content?deviceUUID=dev&tags=EknArticleObject&limit=2&offset=3")
                .await,
        )
        .await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["payload"]["remaining"], 0);
        let names: Vec<&str> = body["payload"]["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["displayName"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["b1", "b2"]);
        let apps = body["payload"]["applications"].as_array().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0]["applicationId"], "com.example.B");
        assert!(apps[0]["icon"].as_str().unwrap().starts_with("/v2/application_icon?"));

        for (_, query) in t.library.recorded_queries() {
            assert_eq!(query.limit, Some(5));
            assert_eq!(query.offset, Some(0));
        }
    }

    #[tokio::test]
    async fn search_skips_failed_sources() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.Broken", "Broken"));
        t.library.add_source(listing("com.example.Good", "Good"));
        t.library.set_query_results(
            "com.example.Broken",
            Err(QueryError::ContentDefect {
                source_id: "com.example.Broken".into(),
                message: "shard unreadable".into(),
            }),
        );
        t.library
            .set_query_results("com.example.Good", Ok(vec![article("g1", "Guide")]));

        let body = body_json(t.get("/v1/search_content?deviceUUID=dev&searchTerm=o").await).await;
        assert_eq!(body["status"], "ok");
        let payload = &body["payload"];
        assert!(payload["applications"]
            .as_array()
            .unwrap()
            .iter()
            .all(|a| a["applicationId"] != "com.example.Broken"));
        let results = payload["results"].as_array().unwrap();
        assert!(results
            .iter()
            .all(|r| r["payload"]["applicationId"] == "com.example.Good"));
        assert!(results.iter().any(|r| r["displayName"] == "Guide"));
    }

    #[tokio::test]
    async fn search_requires_a_filter() {
        let t = TestApp::new(None);
        let body = body_json(t.get("/v1/search_content?deviceUUID=dev").await).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
        assert!(t.library.recorded_queries().is_empty());
    }

    #[tokio::test]
    async fn sets_fall_back_to_the_home_page_set() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.App", "Example"));
        let body = body_json(
            t.get("/v1/list_application_sets?deviceUUID=dev&applicationId=com.example.App")
                .await,
        )
        .await;
        let sets = body["payload"]["sets"].as_array().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0]["global"], true);
        assert_eq!(sets[0]["title"], "Example");

        let body = body_json(
            t.get("/v1/list_application_sets?deviceUUID=dev&applicationId=com.example.Nope")
                .await,
        )
        .await;
        assert_eq!(body["error"]["code"], "INVALID_APP_ID");
    }

    #[tokio::test]
    async fn license_documents_are_rewritten() {
        let t = TestApp::new(None);
        let license_dir = t.state.paths().license_dir.clone();
        std::fs::write(
            license_dir.join("CC-BY-4.0.html"),
            r#"<link rel="stylesheet" href="../css/license.css"><p>terms</p>"#,
        )
        .unwrap();

        let response = t.get("/v1/license?deviceUUID=dev&name=CC-BY-4.0").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        let html = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(html.contains("/v1/resource?deviceUUID=dev&uri=file"));
        assert!(html.contains("adjuster=license"));
        assert!(!html.contains("../css/license.css"));

        let response = t.get("/v1/license?deviceUUID=dev&name=Unknown").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resources_are_served_by_suffix() {
        let t = TestApp::new(None);
        let css_dir = t.state.paths().resource_dir.join("wrapper/css");
        std::fs::create_dir_all(&css_dir).unwrap();
        std::fs::write(css_dir.join("clipboard.css"), "body { color: red; }").unwrap();

        let response = t
            .get("/v1/resource?deviceUUID=dev&uri=resource%3A%2F%2F%2Fwrapper%2Fcss%2Fclipboard.css")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert_eq!(&body_bytes(response).await[..], b"body { color: red; }");

        let body = body_json(
            t.get("/v1/resource?deviceUUID=dev&uri=resource%3A%2F%2F%2Fwrapper%2Fdata.bin")
                .await,
        )
        .await;
        assert_eq!(body["error"]["code"], "FAILED");
    }

    #[tokio::test]
    async fn applications_and_icons_are_listed() {
        let t = TestApp::new(None);
        t.library.add_source(listing("com.example.App", "Example"));
        t.library.add_icon("com.example.App", &b"\x89PNG"[..]);

        let body = body_json(t.get("/v1/list_applications?deviceUUID=dev").await).await;
        let apps = body["payload"].as_array().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0]["displayName"], "Example");
        assert_eq!(
            apps[0]["icon"],
            "/v1/application_icon?deviceUUID=dev&iconName=com.example.App"
        );

        let response = t
            .get("/v1/application_icon?deviceUUID=dev&iconName=com.example.App")
            .await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(&body_bytes(response).await[..], b"\x89PNG");
    }
}
