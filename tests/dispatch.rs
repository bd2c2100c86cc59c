//! Request routing over real HTTP: handler precedence, fallbacks and failures.

use serde_json::Value;

mod common;

#[tokio::test]
async fn exact_pattern_serves_with_init_params() {
    let server = common::start_shop().await;

    let response = server.client.get(server.url("/shop/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "hi from /shop");

    server.container.shutdown().await;
}

#[tokio::test]
async fn prefix_pattern_reports_residual_path() {
    let server = common::start_shop().await;

    let info: Value = server
        .client
        .get(server.url("/shop/info/orders/42"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["contextPath"], "/shop");
    assert_eq!(info["relativePath"], "/info/orders/42");
    assert_eq!(info["handler"], "info");
    assert_eq!(info["handlerPath"], "/info");
    assert_eq!(info["residualPath"], "/orders/42");

    server.container.shutdown().await;
}

#[tokio::test]
async fn prefix_pattern_matches_plain_string_prefix() {
    let server = common::start_shop().await;

    let info: Value = server
        .client
        .get(server.url("/shop/information"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["handler"], "info");
    assert_eq!(info["residualPath"], "rmation");

    server.container.shutdown().await;
}

#[tokio::test]
async fn suffix_pattern_echoes_parameters() {
    let server = common::start_shop().await;

    let echo: Value = server
        .client
        .get(server.url("/shop/cart/add.do?item=apple&item=pear"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["path"], "/shop/cart/add.do");
    assert_eq!(echo["parameters"]["item"], serde_json::json!(["apple", "pear"]));

    server.container.shutdown().await;
}

#[tokio::test]
async fn unmatched_paths_fall_back_to_static_files() {
    let server = common::start_shop().await;

    let index = server.client.get(server.url("/shop/")).send().await.unwrap();
    assert_eq!(index.status(), 200);
    assert_eq!(index.text().await.unwrap(), "<h1>shop</h1>");

    let css = server.client.get(server.url("/shop/css/site.css")).send().await.unwrap();
    assert_eq!(css.headers()["content-type"], "text/css; charset=utf-8");

    let missing = server.client.get(server.url("/shop/missing")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    server.container.shutdown().await;
}

#[tokio::test]
async fn unknown_context_is_404() {
    let server = common::start_shop().await;

    let response = server.client.get(server.url("/nowhere")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    server.container.shutdown().await;
}

#[tokio::test]
async fn service_failure_is_500_with_message() {
    let server = common::start_shop().await;

    let response = server.client.get(server.url("/shop/failing")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("inventory backend offline"));

    // The context keeps serving.
    let response = server.client.get(server.url("/shop/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.container.shutdown().await;
}

#[tokio::test]
async fn init_failure_is_sticky_500() {
    let server = common::start_shop().await;

    for _ in 0..2 {
        let response = server.client.get(server.url("/shop/broken")).send().await.unwrap();
        assert_eq!(response.status(), 500);
        let body = response.text().await.unwrap();
        assert!(body.contains("unavailable"));
        assert!(body.contains("missing database url"));
    }

    server.container.shutdown().await;
}
