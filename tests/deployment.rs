//! Hot deployment over real HTTP.

use std::time::Duration;

use app_container::context::LifecycleState;

mod common;

#[tokio::test]
async fn removed_directory_is_undeployed_with_its_sessions() {
    let server = common::start_shop().await;
    let deployer = server.container.deployer().clone();

    let response = server.client.get(server.url("/shop/session")).send().await.unwrap();
    let cookie = common::session_cookies(&response).remove(0);
    let shop = deployer.context("/shop").unwrap();
    assert_eq!(shop.state(), LifecycleState::Running);
    assert_eq!(shop.sessions().len(), 1);

    std::fs::remove_dir_all(server.root().join("shop")).unwrap();
    let report = deployer.reconcile_now().await;
    assert_eq!(report.undeployed, vec!["/shop".to_string()]);
    assert_eq!(shop.state(), LifecycleState::Unloaded);
    assert!(shop.sessions().is_empty());

    let response = server
        .client
        .get(server.url("/shop/hello"))
        .header("Cookie", cookie.split(';').next().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.container.shutdown().await;
}

#[tokio::test]
async fn new_directory_is_deployed_on_reconcile() {
    let server = common::start_shop().await;

    let response = server.client.get(server.url("/blog/hello")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    common::write_app(server.root(), "blog", common::SHOP_MANIFEST, &[]);
    let report = server.container.deployer().reconcile_now().await;
    assert_eq!(report.deployed, vec!["/blog".to_string()]);

    let response = server.client.get(server.url("/blog/hello")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hi from /blog");

    server.container.shutdown().await;
}

#[tokio::test]
async fn root_application_catches_everything_else() {
    let server = common::start_server(
        |root| {
            common::write_app(root, "ROOT", "", &[("index.html", "root home"), ("about.html", "about us")]);
            common::write_app(root, "shop", common::SHOP_MANIFEST, &[]);
        },
        |_| {},
    )
    .await;

    let home = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(home.text().await.unwrap(), "root home");

    let shop = server.client.get(server.url("/shop/hello")).send().await.unwrap();
    assert_eq!(shop.text().await.unwrap(), "hi from /shop");

    let other = server.client.get(server.url("/about.html")).send().await.unwrap();
    assert_eq!(other.text().await.unwrap(), "about us");

    server.container.shutdown().await;
}

#[tokio::test]
async fn broken_application_does_not_block_others() {
    let server = common::start_server(
        |root| {
            common::write_app(root, "shop", common::SHOP_MANIFEST, &[]);
            common::write_app(root, "blog", "this is = not [valid toml", &[]);
        },
        |_| {},
    )
    .await;

    let deployer = server.container.deployer();
    assert!(deployer.context_by_name("shop").is_some());
    assert!(deployer.context_by_name("blog").is_none());
    assert_eq!(deployer.stats().failed_total, 1);

    let response = server.client.get(server.url("/shop/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.container.shutdown().await;
}

#[tokio::test]
async fn periodic_scan_picks_up_changes() {
    let server = common::start_server(|_| {}, |config| config.deployment.scan_interval_secs = 1).await;

    common::write_app(server.root(), "shop", common::SHOP_MANIFEST, &[]);
    let mut deployed = false;
    for _ in 0..40 {
        if server.container.deployer().context_by_name("shop").is_some() {
            deployed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(deployed, "shop deployed by the background reconciler");

    server.container.shutdown().await;
}

#[tokio::test]
async fn shutdown_undeploys_everything() {
    let server = common::start_shop().await;
    let deployer = server.container.deployer().clone();
    let shop = deployer.context("/shop").unwrap();

    server.container.shutdown().await;
    assert!(deployer.is_empty());
    assert_eq!(shop.state(), LifecycleState::Unloaded);
}
