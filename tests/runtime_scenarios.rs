//! End-to-end scenarios: workers running through the loop while talking to
//! each other through the mailbox and pausing on approval hooks.

use async_trait::async_trait;
use loopwright::core::{
    ApprovalStatus, ApprovalStore, EpisodeStore, HookConfig, HooksConfig, MessageStatus,
    MessageStore, SpanTree,
};
use loopwright::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

struct ResearchWorker;

#[async_trait]
impl Worker for ResearchWorker {
    fn name(&self) -> &str {
        "research"
    }

    async fn think(&self, objective: &Objective, ctx: &mut RunContext<'_>) -> Result<Plan, BoxError> {
        let context = ctx.context_for(objective).await;
        ctx.memory_mut()
            .working_mut()
            .set("prior_runs", context.similar_episodes.len());
        Ok(Plan::new(["search", "hand off"], "look it up, then pass it on")
            .with_confidence(0.8)
            .with_primitives(["web_search"])
            .with_dependencies(["content"]))
    }

    async fn act(&self, _plan: &Plan, ctx: &mut RunContext<'_>) -> Result<Value, BoxError> {
        let findings = json!({"sources": 3, "summary": "wasm is fast"});
        ctx.log_primitive_call("web_search", &json!({"q": "wasm"}), &findings, true);
        ctx.add_cost(1.5);

        if let Some(coordinator) = ctx.coordinator() {
            let message = coordinator
                .handoff_to_content("research", findings.clone(), "article")
                .await;
            if message.status == MessageStatus::Failed {
                return Err("handoff could not be delivered".into());
            }
        }
        Ok(findings)
    }

    async fn observe(
        &self,
        output: &Value,
        _objective: &Objective,
        _ctx: &mut RunContext<'_>,
    ) -> Result<Observation, BoxError> {
        Ok(Observation::success("research delivered")
            .with_metric("sources", output["sources"].as_f64().unwrap_or(0.0)))
    }
}

/// Publishes whatever research was handed to it, behind a publish hook
struct ContentWorker;

#[async_trait]
impl Worker for ContentWorker {
    fn name(&self) -> &str {
        "content"
    }

    async fn think(&self, _objective: &Objective, ctx: &mut RunContext<'_>) -> Result<Plan, BoxError> {
        let inbox = ctx.inbox(10).await;
        let ids: Vec<String> = inbox.iter().map(|m| m.id.to_string()).collect();
        ctx.memory_mut().working_mut().set("inbox", ids.clone());
        Ok(Plan::new(ids, "publish every handoff").with_confidence(0.5))
    }

    async fn act(&self, plan: &Plan, ctx: &mut RunContext<'_>) -> Result<Value, BoxError> {
        let mut published = Vec::new();
        for raw_id in &plan.steps {
            let request = ctx
                .hook_request(json!({"message": raw_id}))
                .with_confidence(plan.confidence);
            let decision = match ctx.check_hook(HookType::BeforePublish, request).await {
                HookDecision::Pause { approval_id } => match ctx.hooks() {
                    Some(hooks) => {
                        hooks
                            .wait_for_approval(&approval_id, Duration::from_secs(5), POLL)
                            .await
                    }
                    None => HookDecision::Continue,
                },
                other => other,
            };
            if matches!(decision, HookDecision::Abort { .. } | HookDecision::Skip) {
                continue;
            }

            let id = loopwright::core::MessageId::parse(raw_id)?;
            if let Some(coordinator) = ctx.coordinator() {
                coordinator
                    .acknowledge_message(&id, Some(json!({"published": true})), None)
                    .await;
            }
            published.push(raw_id.clone());
        }
        Ok(json!({ "published": published }))
    }

    async fn observe(
        &self,
        output: &Value,
        _objective: &Objective,
        _ctx: &mut RunContext<'_>,
    ) -> Result<Observation, BoxError> {
        let count = output["published"].as_array().map_or(0, Vec::len);
        Ok(Observation::new(count > 0, format!("published {count}")))
    }
}

fn coordinator(store: &Arc<InMemoryStore>) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(store.clone()))
}

#[tokio::test]
async fn handoff_reaches_content_ahead_of_routine_work() {
    let store = Arc::new(InMemoryStore::new());
    let mailbox = coordinator(&store);

    for n in 0..3 {
        mailbox
            .send_message(
                "strategy",
                "content",
                MessageType::Request,
                json!({"n": n}),
                Priority::Normal,
                None,
            )
            .await;
    }

    let mut research = AgentRunner::with_store(ResearchWorker, store.clone())
        .with_coordinator(mailbox.clone());
    let result = research
        .run(Objective::new().with("topic", "wasm"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.cost, 1.5);

    let pending = mailbox.get_pending_messages("content", 10).await;
    assert_eq!(pending.len(), 4);
    assert_eq!(pending[0].from_agent, "research");
    assert_eq!(pending[0].priority, Priority::High);
    assert_eq!(pending[0].payload["research"]["summary"], "wasm is fast");
}

#[tokio::test]
async fn content_publishes_after_human_approval() {
    let store = Arc::new(InMemoryStore::new());
    let mailbox = coordinator(&store);
    let hooks = Arc::new(HookRegistry::new(store.clone(), HooksConfig::default()));

    let mut research = AgentRunner::with_store(ResearchWorker, store.clone())
        .with_coordinator(mailbox.clone());
    research.run(Objective::new().with("topic", "wasm")).await.unwrap();

    // a human approving whatever shows up
    let approver = {
        let hooks = hooks.clone();
        tokio::spawn(async move {
            loop {
                let pending = hooks.list_pending(Some("content")).await.unwrap();
                if let Some(approval) = pending.first() {
                    hooks.approve(&approval.id, "editor", None, None).await.unwrap();
                    return approval.id.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut content = AgentRunner::with_store(ContentWorker, store.clone())
        .with_coordinator(mailbox.clone())
        .with_hooks(hooks.clone());
    let result = content.run(Objective::new().with("task", "publish")).await.unwrap();
    let approval_id = approver.await.unwrap();

    assert!(result.success);
    assert_eq!(result.output["published"].as_array().unwrap().len(), 1);
    assert!(mailbox.get_pending_messages("content", 10).await.is_empty());

    let approval = store.get_approval(&approval_id).await.unwrap().unwrap();
    assert_eq!(approval.status, ApprovalStatus::Approved);
    assert_eq!(approval.worker, "content");
    assert_eq!(approval.run_id, Some(result.run_id.clone()));

    let handoff_id = loopwright::core::MessageId::parse(
        result.output["published"][0].as_str().unwrap(),
    )
    .unwrap();
    let handoff = store.get_message(&handoff_id).await.unwrap().unwrap();
    assert_eq!(handoff.status, MessageStatus::Completed);
    assert_eq!(handoff.response, Some(json!({"published": true})));
}

#[tokio::test]
async fn rejected_publish_leaves_message_pending() {
    let store = Arc::new(InMemoryStore::new());
    let mailbox = coordinator(&store);
    let hooks = Arc::new(HookRegistry::new(store.clone(), HooksConfig::default()));

    mailbox
        .handoff_to_content("research", json!({"summary": "draft"}), "post")
        .await;

    let rejecter = {
        let hooks = hooks.clone();
        tokio::spawn(async move {
            loop {
                if let Some(approval) = hooks.list_pending(None).await.unwrap().first() {
                    hooks
                        .reject(&approval.id, "editor", Some("not yet".into()))
                        .await
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut content = AgentRunner::with_store(ContentWorker, store.clone())
        .with_coordinator(mailbox.clone())
        .with_hooks(hooks);
    let result = content.run(Objective::new()).await.unwrap();
    rejecter.await.unwrap();

    assert!(!result.success);
    assert!(result.error.is_none());
    assert_eq!(mailbox.get_pending_messages("content", 10).await.len(), 1);
}

#[tokio::test]
async fn confident_content_skips_the_approval() {
    let store = Arc::new(InMemoryStore::new());
    let mailbox = coordinator(&store);
    let config = HooksConfig::default()
        .with_override(HookType::BeforePublish, HookConfig::auto_approving(0.4));
    let hooks = Arc::new(HookRegistry::new(store.clone(), config));

    mailbox
        .handoff_to_content("research", json!({"summary": "ok"}), "post")
        .await;

    let mut content = AgentRunner::with_store(ContentWorker, store.clone())
        .with_coordinator(mailbox)
        .with_hooks(hooks.clone());
    let result = content.run(Objective::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(store.approval_count().await, 0);
    assert!(hooks.list_pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn stored_trace_rebuilds_into_one_tree() {
    let store = Arc::new(InMemoryStore::new());
    let mut research = AgentRunner::with_store(ResearchWorker, store.clone());
    let result = research.run(Objective::new().with("topic", "x")).await.unwrap();

    let spans = loopwright::core::SpanStore::spans_for_run(store.as_ref(), &result.run_id)
        .await
        .unwrap();
    let trees = SpanTree::build(spans);
    assert_eq!(trees.len(), 1);
    let root = &trees[0];
    assert_eq!(root.span.name, "run");
    assert_eq!(root.span_count(), 5);
    let phases: Vec<&str> = root.children.iter().map(|c| c.span.name.as_str()).collect();
    assert_eq!(phases, vec!["think", "act", "observe"]);
    let act = root.find("act").unwrap();
    assert_eq!(act.children.len(), 1);
    assert_eq!(act.children[0].span.name, "web_search");

    let episode = store.get_episode(&result.run_id).await.unwrap().unwrap();
    assert_eq!(episode.objective.get("topic"), Some(&json!("x")));
}

#[tokio::test]
async fn second_run_sees_the_first_in_its_context() {
    let store = Arc::new(InMemoryStore::new());
    let mut research = AgentRunner::with_store(ResearchWorker, store.clone());

    let objective = Objective::new().with("topic", "WebAssembly");
    research.run(objective.clone()).await.unwrap();

    let context = research.memory().get_context_for_objective(&objective).await;
    assert_eq!(context.similar_episodes.len(), 1);
    assert!(context.working.is_empty());
}

#[tokio::test]
async fn concurrent_senders_share_one_mailbox() {
    let store = Arc::new(InMemoryStore::new());
    let mailbox = coordinator(&store);

    let sends = (0..20).map(|n| {
        let mailbox = mailbox.clone();
        async move {
            let priority = if n % 5 == 0 { Priority::Urgent } else { Priority::Low };
            mailbox
                .send_message("strategy", "quality", MessageType::Request, json!(n), priority, None)
                .await
        }
    });
    let sent = futures::future::join_all(sends).await;
    assert!(sent.iter().all(|m| m.status == MessageStatus::Pending));

    let pending = mailbox.get_pending_messages("quality", 50).await;
    assert_eq!(pending.len(), 20);
    assert!(pending[..4].iter().all(|m| m.priority == Priority::Urgent));
    assert!(pending[4..].iter().all(|m| m.priority == Priority::Low));
}
