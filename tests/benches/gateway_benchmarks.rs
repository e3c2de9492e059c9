//! # API Gateway Benchmarks
//!
//! Hot paths executed on every request or event:
//!
//! | Component | Operation | Per |
//! |-----------|-----------|-----|
//! | PermissionSet | `satisfies` | route and subscription check |
//! | RateLimiter | `try_acquire` | request |
//! | CredentialIssuer | `verify` | authenticated request, WebSocket auth |
//! | SessionRegistry | `broadcast` | pushed event |

use api_gateway::domain::config::{JwtConfig, RateLimitConfig};
use api_gateway::domain::identity::ClientCredential;
use api_gateway::ports::outbound::{ManualClock, SystemTimeSource};
use api_gateway::ws::ConnectionHandle;
use api_gateway::{
    CredentialIssuer, GatewayMetrics, Identity, PermissionSet, RateLimiter, SessionRegistry,
    SigningKeys,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Permissions
// ============================================================================

fn bench_permission_checks(c: &mut Criterion) {
    let mut group = c.benchmark_group("permissions");

    let narrow = PermissionSet::new([
        "api.players.read",
        "api.players.inventory.read",
        "api.worlds.time.read",
        "api.websocket.connect",
    ]);
    let wildcards = PermissionSet::new(["api.players.*", "api.worlds.*", "api.admin.kick"]);

    group.bench_function("exact_hit", |b| {
        b.iter(|| black_box(narrow.satisfies(black_box("api.worlds.time.read"))))
    });
    group.bench_function("exact_miss", |b| {
        b.iter(|| black_box(narrow.satisfies(black_box("api.admin.command"))))
    });
    group.bench_function("wildcard_hit", |b| {
        b.iter(|| black_box(wildcards.satisfies(black_box("api.worlds.blocks.write"))))
    });

    group.finish();
}

// ============================================================================
// Rate limiting
// ============================================================================

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");
    group.measurement_time(Duration::from_secs(5));

    let limiter = RateLimiter::new(RateLimitConfig::default(), Arc::new(SystemTimeSource));

    group.bench_function("single_caller", |b| {
        b.iter(|| black_box(limiter.try_acquire("dashboard", "/players/{id}")))
    });

    for callers in [10usize, 1_000] {
        let keys: Vec<String> = (0..callers).map(|i| format!("client-{}", i)).collect();
        group.throughput(Throughput::Elements(callers as u64));
        group.bench_with_input(BenchmarkId::new("many_callers", callers), &keys, |b, keys| {
            b.iter(|| {
                for key in keys {
                    black_box(limiter.try_acquire(key, "/players"));
                }
            })
        });
    }

    group.finish();
}

// ============================================================================
// Tokens
// ============================================================================

fn bench_token_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokens");

    let issuer = CredentialIssuer::new(
        SigningKeys::generate(),
        &JwtConfig::default(),
        Arc::new(SystemTimeSource),
    )
    .expect("issuer");
    let credential = ClientCredential {
        id: "dashboard".into(),
        secret_hash: String::new(),
        description: String::new(),
        permissions: PermissionSet::new(["api.players.*", "api.websocket.connect"]),
        enabled: true,
    };
    let token = issuer.issue(&credential).expect("token").token;
    let mut forged = token.clone();
    forged.pop();
    forged.push(if token.ends_with('A') { 'B' } else { 'A' });

    group.bench_function("verify_valid", |b| {
        b.iter(|| black_box(issuer.verify(black_box(&token))))
    });
    group.bench_function("verify_bad_signature", |b| {
        b.iter(|| black_box(issuer.verify(black_box(&forged))))
    });
    group.bench_function("issue", |b| b.iter(|| black_box(issuer.issue(&credential))));

    group.finish();
}

// ============================================================================
// Event fan-out
// ============================================================================

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for subscribers in [1usize, 100] {
        let registry = SessionRegistry::new(
            subscribers,
            Arc::new(GatewayMetrics::new()),
            Arc::new(ManualClock::new(0)),
        );
        let mut receivers = Vec::with_capacity(subscribers);
        for _ in 0..subscribers {
            let (handle, rx) = ConnectionHandle::new(1024);
            let id = handle.id();
            let identity = Identity {
                client_id: "bench".into(),
                permissions: PermissionSet::new(["*"]),
                issued_at: 0,
                expires_at: u64::MAX,
                token_id: "bench".into(),
            };
            registry.register(handle, identity);
            registry.subscribe(id, "player.*");
            receivers.push(rx);
        }
        let payload = json!({ "uuid": "u-1", "name": "steve", "world": "overworld" });

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("player_join", subscribers),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let delivered = registry.broadcast("player.join", payload);
                    // keep queues from filling and evicting
                    for rx in receivers.iter_mut() {
                        while rx.try_recv().is_ok() {}
                    }
                    black_box(delivered)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_permission_checks,
    bench_rate_limiter,
    bench_token_verification,
    bench_broadcast,
);

criterion_main!(benches);
