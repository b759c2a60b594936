//! Integration tests for the engine over an in-memory backend.

use entcache_core::InvalidationEvent;
use entcache_engine::{
    CacheStrategy, EngineError, FetchOutcome, Method, MockConnector, MutationOptions,
    MutationRequest, Orchestrator, OrchestratorConfig, QueryTarget, RefetchBehavior, ResetKey,
    Resource, SyncConfig, SyncEngine,
};
use entcache_protocol::{Envelope, FieldErrors};
use entcache_testkit::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter(engine: &SyncEngine<MemoryBackend>, entity: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    engine
        .invalidation()
        .subscribe(entity, move |_: &InvalidationEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    count
}

fn titles(engine: &SyncEngine<MemoryBackend>, key: &str) -> Vec<String> {
    engine
        .store()
        .snapshot("posts")
        .list(key)
        .unwrap_or_default()
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn record_is_fetched_once_within_cache_time() {
    init_tracing();
    let engine = blog_engine();
    let user = engine.record("users", "users", 1);

    assert_eq!(user.fetch().await, FetchOutcome::Completed);
    assert_eq!(user.fetch().await, FetchOutcome::Fresh);

    let state = user.state();
    assert_eq!(state.record().and_then(|r| r.get("name")), Some(&json!("Ada")));
    assert!(!state.loading);
    assert_eq!(engine.connector().call_count(Method::Get, "users/1"), 1);
}

#[tokio::test]
async fn parameterized_lists_are_cached_separately() {
    init_tracing();
    let engine = blog_engine();
    let all = engine.list("posts", "posts");
    let by_ada = engine.query(
        "posts",
        "posts",
        QueryTarget::list_with(Some(params(json!({"author": 1}))), None),
        Default::default(),
    );

    all.fetch().await;
    by_ada.fetch().await;

    assert_eq!(all.state().list().map(<[_]>::len), Some(3));
    assert_eq!(by_ada.state().list().map(<[_]>::len), Some(2));
    assert_ne!(all.key(), by_ada.key());
    assert_eq!(engine.connector().call_count(Method::Get, "posts"), 2);
}

#[tokio::test]
async fn invalidation_without_rule_targets_only_the_entity() {
    init_tracing();
    let engine = blog_engine();
    let users = engine.list("users", "users");
    let posts = engine.list("posts", "posts");
    users.fetch().await;
    posts.fetch().await;

    assert_eq!(engine.invalidate("users", None), vec!["users".to_string()]);

    assert!(users.is_invalidated());
    assert!(!posts.is_invalidated());
    assert_eq!(users.sync().await, FetchOutcome::Completed);
    assert!(!users.is_invalidated());
    assert_eq!(posts.sync().await, FetchOutcome::Fresh);
    assert_eq!(engine.connector().call_count(Method::Get, "users"), 2);
}

#[tokio::test]
async fn rule_predicate_gates_related_entities() {
    init_tracing();
    let engine = blog_engine();
    engine.invalidation().add_rule(
        "posts",
        ["comments"],
        Some(Arc::new(|payload: Option<&Value>| {
            payload
                .and_then(|p| p.get("published"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })),
    );
    let comments = engine.list("comments", "comments");
    comments.fetch().await;

    let targets = engine.invalidate("posts", Some(&json!({"published": false})));
    assert_eq!(targets, vec!["posts".to_string()]);
    assert!(!comments.is_invalidated());

    let targets = engine.invalidate("posts", Some(&json!({"published": true})));
    assert_eq!(targets, vec!["posts".to_string(), "comments".to_string()]);
    assert!(comments.is_invalidated());
}

#[tokio::test]
async fn optimistic_create_is_confirmed() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    posts.fetch().await;

    let create = engine.mutation("posts", "posts", MutationOptions::new().with_optimistic(true));
    let outcome = create.create(json!({"author": 2, "title": "Queues"})).await;

    assert!(outcome.is_success());
    let created = outcome.record.expect("created record");
    assert_eq!(created.get("id"), Some(&json!(4)));

    let snapshot = engine.store().snapshot("posts");
    assert_eq!(snapshot.data("posts/4"), Some(&created));
    assert!(snapshot.records().all(|(_, r)| !r.is_optimistic()));
    let list = posts.state();
    let list = list.list().expect("cached list");
    assert_eq!(list.len(), 4);
    assert!(list.iter().all(|r| !r.is_optimistic()));
}

#[tokio::test]
async fn failed_create_rolls_back() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    posts.fetch().await;
    engine.connector().inject(
        Method::Post,
        "posts",
        Ok(Envelope::failure("CONFLICT", "title taken")),
    );

    let create = engine.mutation("posts", "posts", MutationOptions::new().with_optimistic(true));
    let outcome = create.create(json!({"title": "Compilers"})).await;

    let error = outcome.error.expect("failure");
    assert_eq!(error.code_str(), "CONFLICT");
    assert_eq!(create.state().error.map(|e| e.message), Some("title taken".to_string()));
    assert_eq!(titles(&engine, "list:posts").len(), 3);
    let snapshot = engine.store().snapshot("posts");
    assert!(snapshot.records().all(|(_, r)| !r.is_optimistic()));
    assert_eq!(engine.stats().rollbacks, 1);
    assert_eq!(engine.connector().records("posts").len(), 3);
}

#[tokio::test]
async fn create_with_related_invalidation_patches_own_lists() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    let comments = engine.list("comments", "comments");
    posts.fetch().await;
    comments.fetch().await;
    let post_events = counter(&engine, "posts");
    let comment_events = counter(&engine, "comments");

    let create = engine.mutation(
        "posts",
        "posts",
        MutationOptions::new().with_invalidate_related(["comments"]),
    );
    let outcome = create.create(json!({"author": 1, "title": "Notes"})).await;

    assert_eq!(outcome.invalidated, vec!["comments".to_string()]);
    assert_eq!(comment_events.load(Ordering::SeqCst), 1);
    assert_eq!(post_events.load(Ordering::SeqCst), 0);
    assert!(comments.is_invalidated());
    assert!(!posts.is_invalidated());

    assert_eq!(posts.sync().await, FetchOutcome::Fresh);
    assert_eq!(titles(&engine, "list:posts").last().map(String::as_str), Some("Notes"));
    assert_eq!(engine.connector().call_count(Method::Get, "posts"), 1);
    assert_eq!(comments.sync().await, FetchOutcome::Completed);
}

#[tokio::test]
async fn watched_bindings_refetch_only_invalidated_entities() {
    init_tracing();
    let engine = blog_engine();
    let posts = Arc::new(engine.list("posts", "posts"));
    let comments = Arc::new(engine.list("comments", "comments"));
    posts.fetch().await;
    comments.fetch().await;
    let _posts_watch = posts.watch();
    let _comments_watch = comments.watch();

    let create = engine.mutation(
        "posts",
        "posts",
        MutationOptions::new().with_invalidate_related(["comments"]),
    );
    assert!(create.create(json!({"author": 2, "title": "Parsers"})).await.is_success());

    for _ in 0..50 {
        if engine.connector().call_count(Method::Get, "comments") == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert_eq!(engine.connector().call_count(Method::Get, "comments"), 2);
    assert_eq!(engine.connector().call_count(Method::Get, "posts"), 1);
    assert!(!comments.is_invalidated());
    assert!(!posts.is_invalidated());
    assert_eq!(titles(&engine, "list:posts").last().map(String::as_str), Some("Parsers"));
}

#[tokio::test]
async fn update_patch_and_delete_edit_cached_lists() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    posts.fetch().await;
    let writes = engine.mutation("posts", "posts", MutationOptions::new());

    let updated = writes
        .update(1, json!({"id": 1, "author": 1, "title": "Notes, revised"}))
        .await;
    assert!(updated.is_success());

    let patched = writes.patch(3, json!({"title": "Compilers II"})).await;
    assert_eq!(patched.record.and_then(|r| r.get("author").cloned()), Some(json!(2)));

    assert!(writes.delete(2).await.is_success());

    assert_eq!(
        titles(&engine, "list:posts"),
        vec!["Notes, revised".to_string(), "Compilers II".to_string()]
    );
    assert_eq!(engine.connector().record("posts", "2"), None);
    assert_eq!(engine.connector().call_count(Method::Get, "posts"), 1);
}

#[tokio::test]
async fn invalidate_strategy_leaves_cache_for_refetch() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    posts.fetch().await;
    let writes = engine.mutation(
        "posts",
        "posts",
        MutationOptions::new().with_cache_strategy(CacheStrategy::Invalidate),
    );

    let outcome = writes.patch(1, json!({"title": "Renamed"})).await;
    assert_eq!(outcome.invalidated, vec!["posts".to_string()]);
    assert!(posts.is_invalidated());
    assert_eq!(titles(&engine, "list:posts")[0], "Notes on the engine");

    assert_eq!(posts.sync().await, FetchOutcome::Completed);
    assert_eq!(titles(&engine, "list:posts")[0], "Renamed");
}

#[tokio::test]
async fn stale_while_revalidate_keeps_previous_record() {
    init_tracing();
    let engine = blog_engine();
    let user = engine.record("users", "users", 1);
    user.fetch().await;

    user.set_target(QueryTarget::record(2));
    let state = user.state();
    assert!(state.is_previous);
    assert!(!state.loading);
    assert_eq!(state.record().and_then(|r| r.get("name")), Some(&json!("Ada")));

    user.fetch().await;
    let state = user.state();
    assert!(!state.is_previous);
    assert_eq!(state.record().and_then(|r| r.get("name")), Some(&json!("Grace")));
}

#[tokio::test]
async fn blocking_switch_reports_loading() {
    init_tracing();
    let engine = blog_engine().with_refetch_behavior(RefetchBehavior::Blocking);
    let user = engine.record("users", "users", 1);
    user.fetch().await;

    user.set_target(QueryTarget::record(2));
    let state = user.state();
    assert!(state.data.is_none());
    assert!(state.loading);
}

#[tokio::test]
async fn failed_fetch_keeps_cached_data() {
    init_tracing();
    let engine = blog_engine();
    let user = engine.record("users", "users", 1);
    user.fetch().await;

    engine.connector().set_offline(true);
    assert!(matches!(user.refetch().await, FetchOutcome::Failed(_)));

    let state = user.state();
    assert!(state.record().is_some());
    assert_eq!(state.error.map(|e| e.code_str().to_string()), Some("NETWORK_ERROR".to_string()));
}

#[tokio::test]
async fn optional_errors_do_not_block_required_loading() {
    init_tracing();
    let engine = blog_engine();
    let user = Arc::new(engine.record("users", "users", 1));
    let missing = Arc::new(engine.record("posts", "posts", 99));
    assert!(matches!(missing.fetch().await, FetchOutcome::Failed(_)));

    let orchestrator = Orchestrator::split(
        [("user", Arc::clone(&user) as Arc<dyn Resource>)],
        [("missing", Arc::clone(&missing) as Arc<dyn Resource>)],
    );
    let state = orchestrator.evaluate();
    assert!(state.is_loading);
    assert!(!state.has_errors);
    assert_eq!(
        state.errors.get("missing").map(|e| e.code_str()),
        Some("NOT_FOUND")
    );

    user.fetch().await;
    let state = orchestrator.evaluate();
    assert!(!state.is_loading);
    assert!(!state.is_fetching);
}

#[tokio::test]
async fn retry_after_settling_is_fetching_not_loading() {
    init_tracing();
    let engine = SyncEngine::new(SyncConfig::default(), MockConnector::new());
    engine
        .connector()
        .respond(Method::Get, "users/1", Ok(Envelope::ok(user(1, "Ada"))));
    let binding = Arc::new(engine.record("users", "users", 1));
    binding.fetch().await;

    let orchestrator = Arc::new(Orchestrator::new([(
        "user",
        Arc::clone(&binding) as Arc<dyn Resource>,
    )]));
    assert!(!orchestrator.evaluate().is_loading);

    engine.connector().hold();
    let retry = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.retry("user").await })
    };
    while engine.connector().total_calls() < 2 {
        tokio::task::yield_now().await;
    }

    let state = orchestrator.evaluate();
    assert!(state.is_fetching);
    assert!(!state.is_loading);

    engine.connector().release();
    assert!(retry.await.expect("retry task").is_ok());
    assert!(!orchestrator.evaluate().is_fetching);
    assert_eq!(
        orchestrator.retry("nobody").await,
        Err(EngineError::UnknownResource("nobody".to_string()))
    );
}

#[tokio::test]
async fn reset_key_restores_first_load_semantics() {
    init_tracing();
    let engine = blog_engine();
    let user = Arc::new(engine.record("users", "users", 1));
    user.fetch().await;
    let orchestrator = Orchestrator::new([("user", Arc::clone(&user) as Arc<dyn Resource>)])
        .with_config(OrchestratorConfig::new().with_reset_key(ResetKey::of("users/1")));
    orchestrator.evaluate();

    engine.store().set_loading("users", user.key(), true);
    assert!(!orchestrator.evaluate().is_loading);

    orchestrator.set_reset_key(ResetKey::of("users/2"));
    let state = orchestrator.evaluate();
    assert!(state.is_loading);
    assert!(!state.resources["user"].has_settled);
}

#[tokio::test]
async fn on_error_fires_when_errors_change() {
    init_tracing();
    let engine = blog_engine();
    let missing = Arc::new(engine.record("posts", "posts", 99));
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = {
        let calls = Arc::clone(&calls);
        Orchestrator::new([("missing", Arc::clone(&missing) as Arc<dyn Resource>)]).with_config(
            OrchestratorConfig::new().with_on_error(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        )
    };

    orchestrator.evaluate();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    missing.fetch().await;
    orchestrator.evaluate();
    orchestrator.evaluate();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    engine.connector().inject(
        Method::Get,
        "posts/99",
        Ok(Envelope::failure("GONE", "post removed")),
    );
    missing.refetch().await;
    orchestrator.evaluate();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_backend() {
    init_tracing();
    let engine = blog_engine();
    let writes = engine.mutation("posts", "posts", MutationOptions::new());

    assert_eq!(
        writes
            .execute(MutationRequest::new(Method::Get, None, None))
            .await,
        Err(EngineError::UnsupportedMethod(Method::Get))
    );
    assert_eq!(
        writes
            .execute(MutationRequest::new(Method::Delete, None, None))
            .await,
        Err(EngineError::MissingId(Method::Delete))
    );
    assert_eq!(engine.connector().total_calls(), 0);
}

#[tokio::test]
async fn rejected_input_is_not_sent() {
    init_tracing();
    let engine = blog_engine();
    let writes = engine.mutation(
        "posts",
        "posts",
        MutationOptions::new().with_validator(|data: &Value| {
            let mut fields = FieldErrors::new();
            if data.get("title").and_then(Value::as_str).map_or(true, str::is_empty) {
                fields.insert("title".to_string(), "required".to_string());
            }
            if fields.is_empty() {
                Ok(())
            } else {
                Err(fields)
            }
        }),
    );

    let outcome = writes
        .execute(MutationRequest::create(json!({"title": ""})))
        .await
        .expect("valid request");
    let error = outcome.error.expect("validation failure");
    assert_eq!(error.code_str(), "VALIDATION_ERROR");
    assert_eq!(
        error.validation.and_then(|v| v.get("title").cloned()),
        Some("required".to_string())
    );
    assert_eq!(engine.connector().total_calls(), 0);

    let outcome = writes
        .execute(MutationRequest::create(json!({"title": "Ok"})))
        .await
        .expect("valid request");
    assert!(outcome.is_success());
}

#[tokio::test]
async fn clear_all_forgets_every_entity() {
    init_tracing();
    let engine = blog_engine();
    engine.list("posts", "posts").fetch().await;
    engine.record("users", "users", 2).fetch().await;

    engine.clear_cache("users");
    assert!(engine.store().snapshot("users").is_empty());
    assert!(!engine.store().snapshot("posts").is_empty());

    engine.clear_all();
    assert!(engine.store().snapshot("posts").is_empty());

    let posts = engine.list("posts", "posts");
    assert_eq!(posts.fetch().await, FetchOutcome::Completed);
}

#[tokio::test]
async fn disabled_binding_does_not_fetch() {
    init_tracing();
    let engine = blog_engine();
    let posts = engine.list("posts", "posts");
    posts.set_enabled(false);

    assert_eq!(posts.fetch().await, FetchOutcome::Disabled);
    assert!(!posts.state().loading);
    assert_eq!(engine.connector().total_calls(), 0);
}

#[tokio::test]
async fn memory_engine_lists_start_empty() {
    init_tracing();
    let engine = memory_engine();
    let tasks = engine.list("tasks", "tasks");
    tasks.fetch().await;
    assert_eq!(tasks.state().list().map(<[_]>::len), Some(0));

    let writes = engine.mutation("tasks", "tasks", MutationOptions::new());
    writes.create(json!({"done": false})).await;
    assert_eq!(tasks.state().list().map(<[_]>::len), Some(1));
}
