//! # Lumon Auth Benchmarks
//!
//! Hot paths of the auth gate:
//!
//! | Path | Target |
//! |------|--------|
//! | Identity assertion verify | < 50µs |
//! | Secret hashing | < 5µs |
//! | Session validate (in-memory store) | < 50µs |
//! | Guarded action, cache hit | < 100µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use lumon_auth::domain::{constant_time_compare, hash_secret, RateLimitRule, SecretString};
use lumon_auth::{
    sign_assertion, AuthApi, AuthConfig, AuthCore, AuthPorts, ClientContext, Environment,
    GuardedAction, GuardedRequest, IdentityVerifier, InMemoryStore, SystemClock,
};

const BOT_TOKEN: &str = "bench-bot-token";
const REPLAY_ENDPOINT: &str = "bench-replay";

fn assertion(user_json: &str) -> String {
    let now = chrono::Utc::now().timestamp().to_string();
    sign_assertion(
        BOT_TOKEN,
        &[
            ("auth_date", &now),
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ("user", user_json),
        ],
    )
    .expect("signing succeeds")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn core() -> Arc<AuthCore> {
    let mut config = AuthConfig {
        environment: Environment::Production,
        ..AuthConfig::default()
    };
    config.identity.bot_token = Some(SecretString::new(BOT_TOKEN));
    config.csrf.secret_key = Some(SecretString::new("bench-csrf-key"));
    config
        .rate_limits
        .endpoints
        .insert(REPLAY_ENDPOINT.to_string(), RateLimitRule::per_minute(u32::MAX));
    let store = Arc::new(InMemoryStore::new());
    Arc::new(
        AuthCore::new(config, AuthPorts::in_memory(store), Arc::new(SystemClock))
            .expect("valid bench configuration"),
    )
}

// ============================================================================
// Identity verification
// ============================================================================

fn bench_identity_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity-verify");
    group.measurement_time(Duration::from_secs(5));

    let verifier = IdentityVerifier::new(
        Some(SecretString::new(BOT_TOKEN)),
        Environment::Production,
        Duration::from_secs(3600),
    )
    .expect("verifier");

    let minimal = assertion(r#"{"id":42}"#);
    let full = assertion(
        r#"{"id":42,"first_name":"Mark","last_name":"Scout","username":"mscout","language_code":"en","is_premium":true,"photo_url":"https://t.me/i/userpic/320/abc.jpg"}"#,
    );

    for (name, raw) in [("minimal", &minimal), ("full_profile", &full)] {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("verify", name), raw, |b, raw| {
            b.iter(|| black_box(verifier.verify(raw, chrono::Utc::now()).is_ok()))
        });
    }

    let mut tampered = full.clone().into_bytes();
    tampered[10] ^= 0x01;
    let tampered = String::from_utf8_lossy(&tampered).into_owned();
    group.bench_function("verify_tampered", |b| {
        b.iter(|| black_box(verifier.verify(&tampered, chrono::Utc::now()).is_err()))
    });

    group.finish();
}

// ============================================================================
// Secret hashing and comparison
// ============================================================================

fn bench_secret_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("secret-hashing");

    let secret = "7f3c".repeat(16);
    group.bench_function("hash_secret", |b| b.iter(|| black_box(hash_secret(&secret))));

    let digest = hash_secret(&secret);
    let other = hash_secret("something else");
    group.bench_function("constant_time_compare_equal", |b| {
        b.iter(|| black_box(constant_time_compare(digest.as_str(), digest.as_str())))
    });
    group.bench_function("constant_time_compare_differ", |b| {
        b.iter(|| black_box(constant_time_compare(digest.as_str(), other.as_str())))
    });

    group.finish();
}

// ============================================================================
// Session and gate round trips against the in-memory store
// ============================================================================

fn bench_session_validate(c: &mut Criterion) {
    let rt = runtime();
    let _enter = rt.enter();
    let core = core();
    let secret = rt.block_on(async {
        core.auth
            .auth_init(&assertion(r#"{"id":42}"#), None, &ClientContext::default())
            .await
            .expect("login")
            .session_secret
            .expose()
            .to_string()
    });

    c.bench_function("session_validate", |b| {
        b.iter(|| rt.block_on(async { black_box(core.auth.validate(&secret).await.is_ok()) }))
    });

    rt.block_on(core.shutdown());
}

fn bench_gate_replay(c: &mut Criterion) {
    let rt = runtime();
    let _enter = rt.enter();
    let core = core();
    let action = GuardedAction::new(REPLAY_ENDPOINT);
    let key = uuid::Uuid::new_v4().to_string();
    let secret = rt.block_on(async {
        let secret = core
            .auth
            .auth_init(&assertion(r#"{"id":7}"#), None, &ClientContext::default())
            .await
            .expect("login")
            .session_secret
            .expose()
            .to_string();
        core.gate
            .execute_guarded(
                GuardedRequest::new(&secret).idempotency_key(&key),
                &action,
                |_| async { Ok(serde_json::json!({"chats": []})) },
            )
            .await
            .expect("first call");
        core.tail.flush().await;
        secret
    });

    // Every iteration is answered from the cache.
    c.bench_function("gate_idempotent_replay", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    core.gate
                        .execute_guarded(
                            GuardedRequest::new(&secret).idempotency_key(&key),
                            &action,
                            |_| async { Ok(()) },
                        )
                        .await,
                )
            })
        })
    });

    rt.block_on(core.shutdown());
}

criterion_group!(identity_benches, bench_identity_verify);
criterion_group!(secret_benches, bench_secret_hashing);
criterion_group!(store_benches, bench_session_validate, bench_gate_replay);

criterion_main!(identity_benches, secret_benches, store_benches);
