use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::json;
use sha2::{Digest, Sha256};

use site_connectors::contract::{Connector, ConnectorFile, HostingConnector, StorageConnector};
use site_connectors::error::ConnectorError;
use site_connectors::gitlab::{
    ApiMethod, GitlabConnector, GitlabHostingConnector, GitlabOptions, GitlabSession,
    MockGitlabApi, OAuthTokenResponse,
};
use site_connectors::job::{JobManager, JobStatus};
use site_connectors::session::{ConnectorSession, ConnectorType};

fn options() -> GitlabOptions {
    GitlabOptions::new(
        "client-id",
        "client-secret",
        "https://editor.example.com/api/auth/callback",
    )
}

fn token_response(access_token: &str) -> OAuthTokenResponse {
    OAuthTokenResponse {
        access_token: access_token.to_owned(),
        token_type: Some("bearer".into()),
        expires_in: Some(7200),
        refresh_token: Some("refresh".into()),
        scope: Some("api".into()),
        created_at: None,
    }
}

fn logged_in_session(connector_type: ConnectorType) -> ConnectorSession {
    let mut session = ConnectorSession::new();
    session
        .set(
            "gitlab",
            connector_type,
            &GitlabSession {
                token: Some(token_response("tok")),
                ..Default::default()
            },
        )
        .unwrap();
    session
}

fn storage_connector(api: MockGitlabApi) -> GitlabConnector {
    GitlabConnector::with_api(ConnectorType::Storage, options(), Arc::new(api))
}

#[tokio::test]
async fn oauth_url_carries_the_pkce_challenge_for_the_stored_verifier() {
    let connector = storage_connector(MockGitlabApi::new());
    let mut session = ConnectorSession::new();

    let url = connector
        .get_oauth_url(&mut session)
        .await
        .unwrap()
        .expect("gitlab login is oauth-based");

    let parsed = url::Url::parse(&url).unwrap();
    assert_eq!(parsed.domain(), Some("gitlab.com"));
    assert_eq!(parsed.path(), "/oauth/authorize");
    let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    assert_eq!(query.get("client_id").unwrap(), "client-id");
    assert_eq!(query.get("response_type").unwrap(), "code");
    assert_eq!(query.get("code_challenge_method").unwrap(), "S256");

    let stored: GitlabSession = session
        .get("gitlab", ConnectorType::Storage)
        .unwrap()
        .expect("login state is persisted in the session");
    assert_eq!(query.get("state").unwrap(), stored.state.as_ref().unwrap());
    let expected_challenge =
        URL_SAFE_NO_PAD.encode(Sha256::digest(stored.code_verifier.as_ref().unwrap()));
    assert_eq!(query.get("code_challenge").unwrap(), &expected_challenge);
}

#[tokio::test]
async fn callback_with_mismatched_state_is_rejected_without_an_exchange() {
    // No expectations: any api call would panic the test.
    let connector = storage_connector(MockGitlabApi::new());
    let mut session = ConnectorSession::new();
    session
        .set(
            "gitlab",
            ConnectorType::Storage,
            &GitlabSession {
                state: Some("issued-state".into()),
                code_verifier: Some("issued-verifier".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let result = connector
        .set_token(
            &mut session,
            json!({"code": "authcode", "state": "forged-state"}),
        )
        .await;
    assert!(matches!(result, Err(ConnectorError::InvalidOAuthState(_))));
}

#[tokio::test]
async fn callback_without_a_stored_verifier_is_rejected() {
    let connector = storage_connector(MockGitlabApi::new());
    let mut session = ConnectorSession::new();
    session
        .set(
            "gitlab",
            ConnectorType::Storage,
            &GitlabSession {
                state: Some("issued-state".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let result = connector
        .set_token(
            &mut session,
            json!({"code": "authcode", "state": "issued-state"}),
        )
        .await;
    assert!(matches!(result, Err(ConnectorError::InvalidOAuthState(_))));
}

#[tokio::test]
async fn callback_with_matching_state_exchanges_the_code_and_stores_the_token() {
    let mut api = MockGitlabApi::new();
    api.expect_exchange_code()
        .withf(|request| {
            request.code == "authcode"
                && request.code_verifier == "issued-verifier"
                && request.client_id == "client-id"
        })
        .times(1)
        .returning(|_| Ok(token_response("fresh-token")));
    api.expect_call()
        .withf(|token, method, path, _, _| {
            token == "fresh-token" && *method == ApiMethod::Get && path == "user"
        })
        .times(1)
        .returning(|_, _, _, _, _| {
            Ok(json!({
                "username": "alice",
                "name": "Alice",
                "email": "alice@example.com",
                "avatar_url": "https://gitlab.com/avatar.png",
            }))
        });

    let connector = storage_connector(api);
    let mut session = ConnectorSession::new();
    session
        .set(
            "gitlab",
            ConnectorType::Storage,
            &GitlabSession {
                state: Some("issued-state".into()),
                code_verifier: Some("issued-verifier".into()),
                ..Default::default()
            },
        )
        .unwrap();

    connector
        .set_token(
            &mut session,
            json!({"code": "authcode", "state": "issued-state"}),
        )
        .await
        .unwrap();

    let stored: GitlabSession = session
        .get("gitlab", ConnectorType::Storage)
        .unwrap()
        .unwrap();
    assert_eq!(stored.token.unwrap().access_token, "fresh-token");

    // get_user answers from the session, no further api call.
    let user = connector.get_user(&session).await.unwrap();
    assert_eq!(user.name, "Alice");
    assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    assert_eq!(user.storage.connector_id, "gitlab");
}

#[tokio::test]
async fn write_assets_lands_as_exactly_one_commit() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get && path == "projects/1/repository/tree"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!([{"type": "blob", "path": "assets/old.png"}])));
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions.len() == 3
                && actions[0]["action"] == "update"
                && actions[0]["file_path"] == "assets/old.png"
                && actions[1]["action"] == "create"
                && actions[1]["file_path"] == "assets/new.css"
                && actions[2]["action"] == "create"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"id": "abc123"})));

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    connector
        .write_assets(
            &session,
            "1",
            vec![
                ConnectorFile::new("old.png", vec![1u8, 2, 3]),
                ConnectorFile::new("new.css", "body {}"),
                ConnectorFile::new("fonts/f.woff", vec![9u8]),
            ],
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn asset_classification_sees_blobs_beyond_the_first_tree_page() {
    let mut api = MockGitlabApi::new();
    // Full first page, so the listing must continue.
    api.expect_call()
        .withf(|_, method, path, query, _| {
            *method == ApiMethod::Get
                && path == "projects/1/repository/tree"
                && query.iter().any(|(key, value)| key == "page" && value == "1")
        })
        .times(1)
        .returning(|_, _, _, _, _| {
            let blobs: Vec<_> = (0..100)
                .map(|i| json!({"type": "blob", "path": format!("assets/img-{i}.png")}))
                .collect();
            Ok(serde_json::Value::Array(blobs))
        });
    api.expect_call()
        .withf(|_, method, path, query, _| {
            *method == ApiMethod::Get
                && path == "projects/1/repository/tree"
                && query.iter().any(|(key, value)| key == "page" && value == "2")
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!([{"type": "blob", "path": "assets/style.css"}])));
    // Both files exist on the remote (one per page), so both must be
    // updates; a create for an existing path would be rejected.
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions.len() == 2
                && actions[0]["action"] == "update"
                && actions[0]["file_path"] == "assets/img-42.png"
                && actions[1]["action"] == "update"
                && actions[1]["file_path"] == "assets/style.css"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"id": "abc"})));

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    connector
        .write_assets(
            &session,
            "1",
            vec![
                ConnectorFile::new("img-42.png", vec![1u8]),
                ConnectorFile::new("style.css", "body {}"),
            ],
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn listing_follows_pagination_past_a_full_page() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, query, _| {
            *method == ApiMethod::Get
                && path == "projects"
                && query.iter().any(|(key, value)| key == "page" && value == "1")
        })
        .times(1)
        .returning(|_, _, _, _, _| {
            let projects: Vec<_> = (0..100)
                .map(|i| json!({"id": i, "name": format!("website-Site {i}")}))
                .collect();
            Ok(serde_json::Value::Array(projects))
        });
    api.expect_call()
        .withf(|_, method, path, query, _| {
            *method == ApiMethod::Get
                && path == "projects"
                && query.iter().any(|(key, value)| key == "page" && value == "2")
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!([{"id": 200, "name": "website-Last One"}])));

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    let websites = connector.list_websites(&session).await.unwrap();
    assert_eq!(websites.len(), 101);
    assert_eq!(websites.last().unwrap().name, "Last One");
    assert_eq!(websites.last().unwrap().website_id, "200");
}

#[tokio::test]
async fn reserved_characters_in_asset_paths_are_escaped_for_the_files_endpoint() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get
                && path == "projects/1/repository/files/assets%2Fimg%2Fa%20b%231.png"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"content": BASE64_STANDARD.encode("pixels")})));

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    let content = connector
        .read_asset(&session, "1", "img/a b#1.png")
        .await
        .unwrap();
    assert_eq!(content.into_bytes().await.unwrap(), b"pixels".to_vec());
}

#[tokio::test]
async fn delete_assets_lands_as_exactly_one_commit() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions.len() == 2
                && actions.iter().all(|action| action["action"] == "delete")
                && actions[0]["file_path"] == "assets/a.png"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"id": "def456"})));

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    connector
        .delete_assets(&session, "1", vec!["a.png".into(), "b.png".into()])
        .await
        .unwrap();
}

#[tokio::test]
async fn listing_filters_on_the_repo_prefix_and_strips_it() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, _, _| *method == ApiMethod::Get && path == "projects")
        .returning(|_, _, _, _, _| {
            Ok(json!([
                {"id": 1, "name": "website-My Site", "created_at": "2026-01-01T00:00:00Z"},
                {"id": 2, "name": "dotfiles"},
            ]))
        });

    let connector = storage_connector(api);
    let session = logged_in_session(ConnectorType::Storage);
    let websites = connector.list_websites(&session).await.unwrap();
    assert_eq!(websites.len(), 1);
    assert_eq!(websites[0].website_id, "1");
    assert_eq!(websites[0].name, "My Site");
}

async fn wait_terminal(
    jm: &JobManager,
    job_id: site_connectors::job::JobId,
) -> site_connectors::job::JobPoll {
    for _ in 0..200 {
        let poll = jm.poll(job_id).expect("job is registered");
        if poll.stop {
            return poll;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job never reached a terminal status");
}

#[tokio::test]
async fn publish_never_overwrites_an_existing_pipeline_config() {
    let mut api = MockGitlabApi::new();
    // The repository already carries a customized pipeline.
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get && path == "projects/1/repository/files/.gitlab-ci.yml"
        })
        .times(2)
        .returning(|_, _, _, _, _| {
            Ok(json!({"content": BASE64_STANDARD.encode("pages:\n  script: [custom]\n")}))
        });
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get && path == "projects/1/repository/tree"
        })
        .times(2)
        .returning(|_, _, _, _, _| Ok(json!([])));
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions
                .iter()
                .all(|action| action["file_path"] != ".gitlab-ci.yml")
        })
        .times(2)
        .returning(|_, _, _, _, _| Ok(json!({"id": "abc"})));
    api.expect_call()
        .withf(|_, method, path, _, _| *method == ApiMethod::Get && path == "projects/1/pages")
        .times(2)
        .returning(|_, _, _, _, _| {
            Ok(json!({"url": "https://group.gitlab.io/website-my-site"}))
        });

    let connector = GitlabHostingConnector::with_api(options(), Arc::new(api));
    let session = logged_in_session(ConnectorType::Hosting);
    let jm = JobManager::new();
    let files = || vec![ConnectorFile::new("index.html", "<html></html>")];

    let first = connector
        .publish(&session, "1", files(), &jm)
        .await
        .unwrap();
    let poll = wait_terminal(&jm, first.job_id).await;
    assert_eq!(poll.status, JobStatus::Success);
    assert!(poll.message.contains("https://group.gitlab.io/website-my-site"));

    // Publishing again must leave the pipeline file alone too.
    let second = connector
        .publish(&session, "1", files(), &jm)
        .await
        .unwrap();
    let poll = wait_terminal(&jm, second.job_id).await;
    assert_eq!(poll.status, JobStatus::Success);
}

#[tokio::test]
async fn first_publish_creates_the_pipeline_config_once() {
    let mut api = MockGitlabApi::new();
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get && path == "projects/1/repository/files/.gitlab-ci.yml"
        })
        .times(1)
        .returning(|_, _, _, _, _| Err(ConnectorError::NotFound(".gitlab-ci.yml".into())));
    // First commit creates the pipeline file, second carries the site files.
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions.len() == 1
                && actions[0]["action"] == "create"
                && actions[0]["file_path"] == ".gitlab-ci.yml"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"id": "ci"})));
    api.expect_call()
        .withf(|_, method, path, _, _| {
            *method == ApiMethod::Get && path == "projects/1/repository/tree"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!([])));
    api.expect_call()
        .withf(|_, method, path, _, body| {
            if *method != ApiMethod::Post || path != "projects/1/repository/commits" {
                return false;
            }
            let actions = body.as_ref().unwrap()["actions"].as_array().unwrap();
            actions.len() == 1 && actions[0]["file_path"] == "index.html"
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(json!({"id": "site"})));
    // Pages not provisioned yet.
    api.expect_call()
        .withf(|_, method, path, _, _| *method == ApiMethod::Get && path == "projects/1/pages")
        .times(1)
        .returning(|_, _, _, _, _| Err(ConnectorError::NotFound("pages".into())));

    let connector = GitlabHostingConnector::with_api(options(), Arc::new(api));
    let session = logged_in_session(ConnectorType::Hosting);
    let jm = JobManager::new();

    let job = connector
        .publish(
            &session,
            "1",
            vec![ConnectorFile::new("index.html", "<html></html>")],
            &jm,
        )
        .await
        .unwrap();
    let poll = wait_terminal(&jm, job.job_id).await;
    assert_eq!(poll.status, JobStatus::Success);
}

#[tokio::test]
async fn operations_without_a_token_fail_as_unauthorized() {
    let connector = storage_connector(MockGitlabApi::new());
    let session = ConnectorSession::new();
    let result = connector.list_websites(&session).await;
    assert!(matches!(result, Err(ConnectorError::Unauthorized(_))));
    assert!(!connector.is_logged_in(&session).await);
}
