pub mod auth;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod reactions;
pub mod state;
pub mod workouts;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

pub use state::{AppState, AppStateInner};

/// Every HTTP route. Everything outside `/api/auth/{register,login}` requires
/// a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me).delete(auth::delete_account))
        // Messages
        .route("/api/messages/conversations", get(messages::list_conversations))
        .route("/api/messages/{id}", get(messages::get_history).delete(messages::delete_message))
        .route(
            "/api/messages/{id}/reactions",
            get(reactions::get_reactions).post(reactions::toggle_reaction),
        )
        // Notifications
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/mark-read", post(notifications::mark_read))
        .route("/api/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/api/notifications/{id}", delete(notifications::delete_notification))
        // Friends
        .route("/api/friends", get(friends::list_friends))
        .route(
            "/api/friends/requests",
            get(friends::incoming_requests).post(friends::send_request),
        )
        .route("/api/friends/requests/{id}/accept", post(friends::accept_request))
        .route("/api/friends/requests/{id}/decline", post(friends::decline_request))
        .route("/api/friends/{id}", delete(friends::remove_friend))
        // Posts
        .route("/api/posts", post(posts::create_post))
        .route("/api/posts/feed", get(posts::feed))
        .route("/api/posts/saved", get(posts::saved))
        .route("/api/posts/{id}", delete(posts::delete_post))
        .route("/api/posts/{id}/like", post(posts::toggle_like))
        .route("/api/posts/{id}/save", post(posts::toggle_save))
        .route(
            "/api/posts/{id}/comments",
            get(posts::list_comments).post(posts::add_comment),
        )
        // Workouts
        .route("/api/workouts", get(workouts::list).post(workouts::create))
        .route("/api/workouts/{id}", delete(workouts::cancel))
        .route("/api/workouts/{id}/respond", post(workouts::respond))
        .route("/api/workouts/{id}/opt-out", post(workouts::opt_out))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use stayfit_db::Database;
    use stayfit_gateway::Gateway;
    use stayfit_types::events::{SendMessagePayload, ServerEvent};

    use super::*;

    fn test_state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(db.clone(), "test-secret", Duration::from_secs(1));
        Arc::new(AppStateInner {
            db,
            gateway,
            token_ttl: chrono::Duration::days(7),
        })
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, name: &str) -> (i64, String) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "username": name,
                "email": format!("{}@example.com", name),
                "password": "correct horse battery",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn befriend(app: &Router, (_, from_token): &(i64, String), (to_id, to_token): &(i64, String)) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/friends/requests",
            Some(from_token),
            Some(json!({ "userId": to_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let request_id = body["id"].as_i64().unwrap();
        let (status, _) = call(
            app,
            Method::POST,
            &format!("/api/friends/requests/{}/accept", request_id),
            Some(to_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_or_bad_tokens() {
        let app = router(test_state());

        let (status, body) = call(&app, Method::GET, "/api/notifications", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "No token");

        let (status, body) = call(&app, Method::GET, "/api/notifications", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn register_then_login() {
        let app = router(test_state());
        let (id, token) = register(&app, "alice").await;

        let (status, me) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], id);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "ALICE@example.com", "password": "correct horse battery" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "alice@example.com", "password": "wrong password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice", "email": "other@example.com", "password": "longenough" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice2", "email": "Alice@Example.com", "password": "longenough" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Username or email already registered");
    }

    #[tokio::test]
    async fn friendship_reactions_and_delete_flow() {
        let state = test_state();
        let app = router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        befriend(&app, &alice, &bob).await;

        // bob got the request, alice got the acceptance
        let (_, bob_notes) = call(&app, Method::GET, "/api/notifications", Some(&bob.1), None).await;
        assert_eq!(bob_notes["notifications"][0]["type"], "friend_request");
        assert_eq!(bob_notes["unread"], 1);
        let (_, alice_notes) = call(&app, Method::GET, "/api/notifications", Some(&alice.1), None).await;
        assert_eq!(alice_notes["notifications"][0]["type"], "friend_accept");

        let msg = state
            .gateway
            .engine
            .send_message(
                alice.0,
                None,
                SendMessagePayload {
                    receiver_id: bob.0,
                    content: "leg day?".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (_, mut alice_rx) = state.gateway.registry.connect(alice.0).await;

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/messages/{}/reactions", msg.id),
            Some(&bob.1),
            Some(json!({ "emoji": "🔥" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reactions"][0]["count"], 1);
        assert_eq!(body["reactions"][0]["reacted_by_me"], true);

        match alice_rx.try_recv().unwrap() {
            ServerEvent::ReactionUpdate { message_id, reactions } => {
                assert_eq!(message_id, msg.id);
                assert_eq!(reactions[0].count, 1);
                assert!(!reactions[0].reacted_by_me);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let uri = format!("/api/messages/{}", msg.id);
        let (status, body) = call(&app, Method::DELETE, &uri, Some(&bob.1), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Only the sender can delete a message");

        let (status, _) = call(&app, Method::DELETE, &uri, Some(&alice.1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(matches!(alice_rx.try_recv().unwrap(), ServerEvent::MessageDeleted { .. }));

        let (status, history) = call(
            &app,
            Method::GET,
            &format!("/api/messages/{}", bob.0),
            Some(&alice.1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(history["messages"].as_array().unwrap().is_empty());

        let (_, marked) = call(&app, Method::POST, "/api/notifications/mark-all-read", Some(&bob.1), None).await;
        assert_eq!(marked["updated"], 1);
    }

    #[tokio::test]
    async fn history_requires_friendship() {
        let app = router(test_state());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/messages/{}", bob.0),
            Some(&alice.1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn history_pages_with_limit_and_cursor() {
        let state = test_state();
        let app = router(state.clone());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        befriend(&app, &alice, &bob).await;

        for content in ["warmup", "main set", "cooldown"] {
            let payload = SendMessagePayload {
                receiver_id: bob.0,
                content: content.into(),
                ..Default::default()
            };
            state.gateway.engine.send_message(alice.0, None, payload).await.unwrap();
        }

        let uri = format!("/api/messages/{}?limit=2", alice.0);
        let (status, page) = call(&app, Method::GET, &uri, Some(&bob.1), None).await;
        assert_eq!(status, StatusCode::OK);
        let page = page["messages"].as_array().unwrap().clone();
        let contents: Vec<&str> = page.iter().map(|m| m["content"].as_str().unwrap()).collect();
        assert_eq!(contents, ["main set", "cooldown"]);

        let uri = format!("/api/messages/{}?limit=2&before={}", alice.0, page[0]["id"]);
        let (_, older) = call(&app, Method::GET, &uri, Some(&bob.1), None).await;
        assert_eq!(older["messages"].as_array().unwrap().len(), 1);
        assert_eq!(older["messages"][0]["content"], "warmup");
    }

    #[tokio::test]
    async fn likes_and_comments_notify_the_author() {
        let app = router(test_state());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        befriend(&app, &alice, &bob).await;

        let (status, post) = call(
            &app,
            Method::POST,
            "/api/posts",
            Some(&alice.1),
            Some(json!({ "caption": "5k personal best" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let post_id = post["id"].as_i64().unwrap();

        let (_, liked) = call(&app, Method::POST, &format!("/api/posts/{}/like", post_id), Some(&bob.1), None).await;
        assert_eq!(liked, json!({ "active": true, "count": 1 }));

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/posts/{}/comments", post_id),
            Some(&bob.1),
            Some(json!({ "content": "nice pace" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, notes) = call(&app, Method::GET, "/api/notifications", Some(&alice.1), None).await;
        let kinds: Vec<&str> = notes["notifications"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["type"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"like"));
        assert!(kinds.contains(&"comment"));

        let (_, bob_notes) = call(&app, Method::GET, "/api/notifications?type=post", Some(&bob.1), None).await;
        assert_eq!(bob_notes["notifications"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn workout_invites_only_reach_friends() {
        let app = router(test_state());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let carol = register(&app, "carol").await;
        befriend(&app, &alice, &bob).await;

        let (status, created) = call(
            &app,
            Method::POST,
            "/api/workouts",
            Some(&alice.1),
            Some(json!({
                "workout": "Intervals",
                "date": "2026-05-01",
                "time": "07:15",
                "inviteeIds": [bob.0, carol.0],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();

        let (_, list) = call(&app, Method::GET, "/api/workouts", Some(&alice.1), None).await;
        let participants = list[0]["participants"].as_array().unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0]["userId"], bob.0);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/workouts/{}/respond", id),
            Some(&carol.1),
            Some(json!({ "accepted": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/workouts/{}/respond", id),
            Some(&bob.1),
            Some(json!({ "accepted": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::DELETE, &format!("/api/workouts/{}", id), Some(&bob.1), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, Method::DELETE, &format!("/api/workouts/{}", id), Some(&alice.1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, bob_notes) = call(
            &app,
            Method::GET,
            "/api/notifications?type=workout_canceled",
            Some(&bob.1),
            None,
        )
        .await;
        assert_eq!(bob_notes["notifications"].as_array().unwrap().len(), 1);

        let (_, aliased) = call(
            &app,
            Method::GET,
            "/api/notifications?type=workout_cancelled",
            Some(&bob.1),
            None,
        )
        .await;
        assert_eq!(aliased["notifications"], bob_notes["notifications"]);
    }

    #[tokio::test]
    async fn bad_workout_time_is_rejected() {
        let app = router(test_state());
        let alice = register(&app, "alice").await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/workouts",
            Some(&alice.1),
            Some(json!({ "workout": "Row", "date": "2026-05-01", "time": "7pm" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Time must be HH:MM");
    }
}
