use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::num::NonZeroU32;

use tickrelay::bridge::{Bridge, BridgeBuilder};
use tickrelay::continuation::{Continuation, Outcome, Solver};
use tickrelay::endpoint::{EndpointDecl, Handler, HandlerError, Verb};
use tickrelay::envelope::RequestEnvelope;
use tickrelay::transport::{ChannelConfig, ChannelSecret, ServerSide};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bridge_with(decls: Vec<EndpointDecl>) -> (Bridge, ServerSide) {
    init_tracing();
    let secret = ChannelSecret::from("dispatch-test");
    let bridge = BridgeBuilder::new()
        .with_node_addr("worker-test")
        .with_channel_config(ChannelConfig::new("local", secret.clone()))
        .with_capability(decls)
        .build()
        .expect("bridge builds");
    let server = bridge.server_side(&secret).expect("server side attaches");
    (bridge, server)
}

/// Answers with its positional arguments.
struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, args: Vec<Value>) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Final(Value::Array(args)))
    }
}

/// Always fails; the dispatch boundary must swallow it.
struct Failing;

#[async_trait]
impl Handler for Failing {
    async fn call(&self, _args: Vec<Value>) -> Result<Outcome, HandlerError> {
        Err(HandlerError::failed("boom"))
    }
}

/// Solver that suspends while `remaining > 0`, then yields its result.
struct Countdown {
    result: Value,
}

#[async_trait]
impl Solver for Countdown {
    async fn solve(&self, kwargs: &Map<String, Value>) -> Result<Outcome, HandlerError> {
        let remaining = kwargs
            .get("remaining")
            .and_then(Value::as_u64)
            .ok_or(HandlerError::MissingArg { what: "remaining" })?;
        if remaining == 0 {
            Ok(Outcome::Final(self.result.clone()))
        } else {
            Ok(Outcome::Suspend(
                Continuation::new(Countdown {
                    result: self.result.clone(),
                })
                .with_kwarg("remaining", json!(remaining - 1)),
            ))
        }
    }
}

/// Endpoint that postpones itself: args are `[remaining, result]`.
struct SlowJob;

#[async_trait]
impl Handler for SlowJob {
    async fn call(&self, args: Vec<Value>) -> Result<Outcome, HandlerError> {
        let remaining = args
            .first()
            .and_then(Value::as_u64)
            .ok_or(HandlerError::MissingArg { what: "remaining" })?;
        let result = args
            .get(1)
            .cloned()
            .ok_or(HandlerError::MissingArg { what: "result" })?;
        Ok(Outcome::Suspend(
            Continuation::new(Countdown { result }).with_kwarg("remaining", json!(remaining)),
        ))
    }
}

/// Solver that never resolves, re-suspending with a bounded retry budget.
struct Stall {
    max_attempts: Option<NonZeroU32>,
}

#[async_trait]
impl Solver for Stall {
    async fn solve(&self, _kwargs: &Map<String, Value>) -> Result<Outcome, HandlerError> {
        let mut next = Continuation::new(Stall {
            max_attempts: self.max_attempts,
        });
        if let Some(max) = self.max_attempts {
            next = next.with_max_attempts(max);
        }
        Ok(Outcome::Suspend(next))
    }
}

/// Endpoint that stalls forever (optionally with a retry budget).
struct StallJob {
    max_attempts: Option<NonZeroU32>,
}

#[async_trait]
impl Handler for StallJob {
    async fn call(&self, _args: Vec<Value>) -> Result<Outcome, HandlerError> {
        let mut c = Continuation::new(Stall {
            max_attempts: self.max_attempts,
        });
        if let Some(max) = self.max_attempts {
            c = c.with_max_attempts(max);
        }
        Ok(Outcome::Suspend(c))
    }
}

#[tokio::test]
async fn final_handler_answers_with_matching_id_and_node_addr() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new("echo", Verb::Get, Echo)]);

    server
        .push_inbound(RequestEnvelope::new("r-1", "echo", vec![json!(7)]))
        .unwrap();

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(report.responded, 1);
    assert!(report.faults.is_empty());

    let response = server.poll_outbound().unwrap().expect("one response");
    assert_eq!(response.id.as_str(), "r-1");
    assert_eq!(response.value.result, json!([7]));
    assert_eq!(response.value.node_addr, "worker-test");

    // Exactly one reply per request.
    assert!(server.poll_outbound().unwrap().is_none());
}

#[tokio::test]
async fn unknown_method_yields_null_and_loop_survives() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new("echo", Verb::Get, Echo)]);

    server
        .push_inbound(RequestEnvelope::new("x", "nonexistent", vec![]))
        .unwrap();

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.faults.len(), 1);
    assert!(report.faults[0].cause.contains("unknown method"));

    let response = server.poll_outbound().unwrap().expect("null reply");
    assert_eq!(response.id.as_str(), "x");
    assert_eq!(response.value.result, Value::Null);

    // The loop keeps dispatching afterwards.
    server
        .push_inbound(RequestEnvelope::new("y", "echo", vec![json!("still alive")]))
        .unwrap();
    bridge.tick().await.unwrap();
    let response = server.poll_outbound().unwrap().expect("echo reply");
    assert_eq!(response.id.as_str(), "y");
    assert_eq!(response.value.result, json!(["still alive"]));
}

#[tokio::test]
async fn fault_does_not_block_the_next_request_in_the_same_tick() {
    let (mut bridge, server) = bridge_with(vec![
        EndpointDecl::new("broken", Verb::Post, Failing),
        EndpointDecl::new("echo", Verb::Get, Echo),
    ]);

    server
        .push_inbound(RequestEnvelope::new("a", "broken", vec![]))
        .unwrap();
    server
        .push_inbound(RequestEnvelope::new("b", "echo", vec![json!(2)]))
        .unwrap();

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.handled, 2);
    assert_eq!(report.responded, 2);
    assert_eq!(report.faults.len(), 1);
    assert_eq!(report.faults[0].endpoint, "broken");
    assert!(report.faults[0].cause.contains("boom"));

    let first = server.poll_outbound().unwrap().unwrap();
    assert_eq!(first.id.as_str(), "a");
    assert_eq!(first.value.result, Value::Null);

    let second = server.poll_outbound().unwrap().unwrap();
    assert_eq!(second.id.as_str(), "b");
    assert_eq!(second.value.result, json!([2]));
}

#[tokio::test]
async fn continuation_resolves_exactly_at_tick_k() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new("slow", Verb::Post, SlowJob)]);

    // Tick 1 consumes the request and stores the continuation; the solver
    // then suspends once (tick 2) and resolves on tick 3.
    server
        .push_inbound(RequestEnvelope::new(
            "slow-1",
            "slow",
            vec![json!(1), json!("done")],
        ))
        .unwrap();

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.suspended, 1);
    assert!(server.poll_outbound().unwrap().is_none(), "no reply at tick 1");

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.retried, 1);
    assert!(server.poll_outbound().unwrap().is_none(), "no reply at tick 2");

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.responded, 1);
    let response = server.poll_outbound().unwrap().expect("reply at tick 3");
    assert_eq!(response.id.as_str(), "slow-1");
    assert_eq!(response.value.result, json!("done"));
}

#[tokio::test]
async fn pending_continuations_never_block_new_requests() {
    let (mut bridge, server) = bridge_with(vec![
        EndpointDecl::new("slow", Verb::Post, SlowJob),
        EndpointDecl::new("echo", Verb::Get, Echo),
    ]);

    server
        .push_inbound(RequestEnvelope::new(
            "slow-1",
            "slow",
            vec![json!(100), json!("eventually")],
        ))
        .unwrap();
    bridge.tick().await.unwrap();
    assert_eq!(bridge.pending(), 1);

    // A fresh request arriving while the continuation is parked is answered
    // within the same tick that retries (and re-parks) the continuation.
    server
        .push_inbound(RequestEnvelope::new("quick", "echo", vec![json!(1)]))
        .unwrap();
    let report = bridge.tick().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.responded, 1);
    assert_eq!(bridge.pending(), 1);

    let response = server.poll_outbound().unwrap().expect("quick reply");
    assert_eq!(response.id.as_str(), "quick");
}

#[tokio::test]
async fn distinct_ids_pair_with_their_own_results() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new("echo", Verb::Get, Echo)]);

    let total = 5;
    for i in 0..total {
        server
            .push_inbound(RequestEnvelope::new(
                format!("req-{i}").as_str(),
                "echo",
                vec![json!(i * 10)],
            ))
            .unwrap();
    }

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.responded, total);

    for i in 0..total {
        let response = server.poll_outbound().unwrap().expect("response");
        assert_eq!(response.id.as_str(), format!("req-{i}"));
        assert_eq!(response.value.result, json!([i * 10]));
    }
    assert!(server.poll_outbound().unwrap().is_none());
}

#[tokio::test]
async fn exhausted_retry_budget_yields_null_reply() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new(
        "stall",
        Verb::Post,
        StallJob {
            max_attempts: NonZeroU32::new(2),
        },
    )]);

    server
        .push_inbound(RequestEnvelope::new("s-1", "stall", vec![]))
        .unwrap();

    // Tick 1 parks the continuation; ticks 2 and 3 spend the two allowed
    // solver attempts; the second suspension exhausts the budget.
    bridge.tick().await.unwrap();
    let report = bridge.tick().await.unwrap();
    assert_eq!(report.retried, 1);
    assert!(server.poll_outbound().unwrap().is_none());

    let report = bridge.tick().await.unwrap();
    assert_eq!(report.retried, 0);
    assert_eq!(report.faults.len(), 1);
    assert!(report.faults[0].cause.contains("retry budget exhausted"));

    let response = server.poll_outbound().unwrap().expect("null reply");
    assert_eq!(response.id.as_str(), "s-1");
    assert_eq!(response.value.result, Value::Null);
    assert_eq!(bridge.pending(), 0);
}

#[tokio::test]
async fn unresolved_continuations_emit_nothing_after_shutdown() {
    let (mut bridge, server) = bridge_with(vec![EndpointDecl::new(
        "stall",
        Verb::Post,
        StallJob { max_attempts: None },
    )]);

    server
        .push_inbound(RequestEnvelope::new("s-1", "stall", vec![]))
        .unwrap();
    bridge.tick().await.unwrap();
    assert_eq!(bridge.pending(), 1);
    assert_eq!(bridge.channel().outbound_len(), 0);

    bridge.shutdown();

    // Ticking after teardown fails; nothing was ever pushed outbound.
    assert!(bridge.tick().await.is_err());
    assert_eq!(bridge.channel().outbound_len(), 0);
}
