mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use futures::future::join_all;
use serde_json::json;

#[tokio::test]
async fn tutorial_is_only_visible_to_its_tenant() -> Result<()> {
    for strategy in common::STRATEGIES {
        let app = common::spawn(strategy).await?;

        let created = app.create("tenant1", "Tenancy in Rust").await?;
        assert_eq!(created.status, StatusCode::CREATED, "{:?}: {}", strategy, created.body);
        assert_eq!(created.body["success"], json!(true));
        assert_eq!(created.data()["tenant"], json!("tenant1"));
        let id = created.id();

        let foreign = app.get("tenant2", &id).await?;
        assert_eq!(foreign.status, StatusCode::NOT_FOUND, "{:?}: {}", strategy, foreign.body);

        let own = app.get("tenant1", &id).await?;
        assert_eq!(own.status, StatusCode::OK, "{:?}", strategy);
        assert_eq!(own.data(), created.data());
    }
    Ok(())
}

#[tokio::test]
async fn list_and_count_are_scoped() -> Result<()> {
    for strategy in common::STRATEGIES {
        let app = common::spawn(strategy).await?;
        for title in ["One", "Two"] {
            app.create("tenant1", title).await?;
        }
        app.create("tenant2", "Other").await?;

        let list = app.send(Method::GET, "/api/tutorials", Some("tenant1"), None).await?;
        assert_eq!(list.status, StatusCode::OK);
        let items = list.data().as_array().cloned().unwrap_or_default();
        assert_eq!(items.len(), 2, "{:?}: {}", strategy, list.body);
        assert!(items.iter().all(|t| t["tenant"] == json!("tenant1")));

        let count = app.send(Method::GET, "/api/tutorials/count", Some("tenant2"), None).await?;
        assert_eq!(count.data()["count"], json!(1), "{:?}", strategy);
    }
    Ok(())
}

#[tokio::test]
async fn empty_tenant_lists_nothing() -> Result<()> {
    let app = common::spawn(common::STRATEGIES[1]).await?;
    app.create("tenant1", "Not yours").await?;

    let list = app.send(Method::GET, "/api/tutorials", Some("tenant2"), None).await?;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.data(), &json!([]));
    Ok(())
}

#[tokio::test]
async fn list_supports_paging() -> Result<()> {
    let app = common::spawn(common::STRATEGIES[0]).await?;
    for i in 0..5 {
        app.create("tenant1", &format!("Part {}", i)).await?;
    }

    let page = app
        .send(Method::GET, "/api/tutorials?page=2&size=2", Some("tenant1"), None)
        .await?;
    let titles: Vec<&str> = page
        .data()
        .as_array()
        .map(|items| items.iter().filter_map(|t| t["title"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(titles, vec!["Part 4"]);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_stay_isolated() -> Result<()> {
    for strategy in common::STRATEGIES {
        let app = common::spawn(strategy).await?;

        let requests = (0..20).map(|i| {
            let tenant = if i % 2 == 0 { "tenant1" } else { "tenant2" };
            let app = &app;
            async move { (tenant, app.create(tenant, &format!("Concurrent {}", i)).await) }
        });

        for (tenant, res) in join_all(requests).await {
            let res = res?;
            assert_eq!(res.status, StatusCode::CREATED, "{:?}: {}", strategy, res.body);
            assert_eq!(res.data()["tenant"], json!(tenant), "{:?}", strategy);
        }

        for tenant in ["tenant1", "tenant2"] {
            let count = app.send(Method::GET, "/api/tutorials/count", Some(tenant), None).await?;
            assert_eq!(count.data()["count"], json!(10), "{:?} {}", strategy, tenant);
        }
    }
    Ok(())
}
