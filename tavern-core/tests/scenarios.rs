//! End-to-end turn scenarios against a scripted collaborator.
//!
//! Run with: `cargo test -p tavern-core --test scenarios`

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tavern_core::ai::parse_response;
use tavern_core::command::ChangeOutcome;
use tavern_core::testing::{
    assert_applied, assert_rejected, assert_tier_len, assert_value, turn_json, TestHarness,
};
use tavern_core::events::EventError;
use tavern_core::{ClockTime, EngineConfig, EventScheduler, MemoryTier, SessionError};

// =============================================================================
// Scenario A: the first event tick only schedules
// =============================================================================

#[tokio::test]
async fn test_first_tick_schedules_without_firing() {
    let mut harness = TestHarness::with_config(EngineConfig::new().with_event_years(1, 5));
    assert_eq!(harness.doc().clock(), ClockTime::new(1000, 1, 1, 0, 0));
    let log_before = harness.get("世界.事件.记录").cloned();

    let (event, log) = harness
        .session
        .tick_events(&mut StdRng::seed_from_u64(2024))
        .await
        .unwrap();

    assert!(event.is_none());
    let next = EventScheduler::next_event_at(harness.doc()).expect("next event recorded");
    assert!(next > harness.doc().clock());
    assert_eq!(harness.get("世界.事件.记录").cloned(), log_before);
    assert_applied(&log, "世界.事件.下次事件时间");
    assert_eq!(harness.session.collaborator().calls(), 0);
}

#[tokio::test]
async fn test_due_event_fires_during_turn() {
    let mut harness = TestHarness::with_config(EngineConfig::new());
    harness.apply(&[json!({
        "action": "set",
        "key": "世界.事件.下次事件时间",
        "value": {"年": 1000, "月": 1, "日": 1, "时": 0, "分": 0}
    })]);

    harness
        .expect_turn("钟声响起。", "听见钟声", vec![])
        .expect_reply(r#"{"名称": "宗门大比", "描述": "三年一度的大比开始了"}"#);

    let report = harness.input("去看看").await.unwrap();
    let event = report.event.expect("event fired");
    assert_eq!(event.name, "宗门大比");
    assert_eq!(
        harness.get("世界.事件.记录").and_then(|v| v.as_array()).map(Vec::len),
        Some(1)
    );
    assert_value(
        harness.doc(),
        "社交.记忆.短期记忆.1.内容",
        json!("【世界事件】宗门大比：三年一度的大比开始了"),
    );
    assert!(EventScheduler::next_event_at(harness.doc()).unwrap() > harness.doc().clock());
}

// =============================================================================
// Scenario B: accumulation is logged with before and after
// =============================================================================

#[tokio::test]
async fn test_add_to_reputation_logs_old_and_new() {
    let mut harness = TestHarness::new();
    harness.apply(&[json!({"action": "set", "key": "角色.属性.声望", "value": 5})]);

    let log = harness.apply(&[json!({"action": "add", "key": "角色.属性.声望", "value": 10})]);

    assert_value(harness.doc(), "角色.属性.声望", json!(15));
    let entry = &log.entries()[0];
    assert_eq!(entry.outcome, ChangeOutcome::Applied);
    assert_eq!(entry.old_value, json!(5));
    assert_eq!(entry.new_value, json!(15));
}

// =============================================================================
// Scenario C: a push past the short-term limit evicts into mid-term
// =============================================================================

#[tokio::test]
async fn test_push_past_short_limit_promotes_oldest() {
    let mut harness = TestHarness::with_config(
        EngineConfig::new()
            .with_short_term_limit(5)
            .with_events(false),
    );
    for i in 0..5 {
        let reply = turn_json(&format!("第{i}回"), &format!("摘要{i}"), vec![]);
        harness
            .session
            .apply_response(&reply, &|| false)
            .await
            .unwrap();
    }
    assert_tier_len(harness.doc(), MemoryTier::Short, 5);
    assert_tier_len(harness.doc(), MemoryTier::Mid, 0);

    let log = harness.apply(&[json!({"action": "push", "key": "社交.记忆.短期记忆", "value": "hello"})]);
    assert_applied(&log, "社交.记忆.短期记忆");

    assert_tier_len(harness.doc(), MemoryTier::Short, 5);
    assert_tier_len(harness.doc(), MemoryTier::Mid, 1);
    assert_value(harness.doc(), "社交.记忆.短期记忆.0.内容", json!("第1回"));
    assert_value(harness.doc(), "社交.记忆.短期记忆.4.内容", json!("hello"));
    assert!(harness.get("社交.记忆.短期记忆.4.时间").is_some());
    assert_value(harness.doc(), "社交.记忆.中期记忆.0.内容", json!("摘要0"));
}

// =============================================================================
// Scenario D: malformed replies still yield narrative
// =============================================================================

#[test]
fn test_embedded_object_is_recovered() {
    let outcome = parse_response("Sure! {\"text\":\"...\"} done.");
    assert_eq!(outcome.response.text, "...");
    assert!(!outcome.response.action_options.is_empty());
}

#[tokio::test]
async fn test_unparseable_reply_degrades_to_narrative() {
    let mut harness = TestHarness::new();
    harness.expect_reply("你走进了一片迷雾，什么也看不清。");

    let report = harness.input("前进").await.unwrap();
    assert_eq!(report.text, "你走进了一片迷雾，什么也看不清。");
    assert_eq!(report.parse_strategy, "raw_narrative");
    assert!(report.change_log.is_empty());
    assert_eq!(report.action_options.len(), 3);
    assert!(!report.notices.is_empty());
    assert_tier_len(harness.doc(), MemoryTier::Short, 1);
}

// =============================================================================
// Mixed batches
// =============================================================================

#[tokio::test]
async fn test_batch_with_bad_commands_still_applies_good_ones() {
    let mut harness = TestHarness::new();
    harness.expect_turn(
        "你与林婉儿相识。",
        "结识林婉儿",
        vec![
            json!({"action": "set", "key": "社交.关系.林婉儿", "value": {"好感度": "10"}}),
            json!({"action": "add", "key": "角色.背包.灵石.下品", "value": "+30"}),
            json!({"action": "launch", "key": "世界.月亮", "value": 1}),
            json!({"action": "set", "key": "天界.规则", "value": 1}),
        ],
    );

    let report = harness.input("打招呼").await.unwrap();
    assert_applied(&report.change_log, "社交.关系.林婉儿");
    assert_applied(&report.change_log, "角色.背包.灵石.下品");
    assert_rejected(&report.change_log, "世界.月亮");
    assert_value(harness.doc(), "社交.关系.林婉儿.名字", json!("林婉儿"));
    assert_value(harness.doc(), "社交.关系.林婉儿.关系", json!("陌生"));
    assert_value(harness.doc(), "角色.背包.灵石.下品", json!(30));
    assert_eq!(harness.get("天界"), None);
}

#[tokio::test]
async fn test_currency_cannot_go_negative() {
    let mut harness = TestHarness::new();
    let log = harness.apply(&[
        json!({"action": "add", "key": "角色.背包.灵石.中品", "value": 3}),
        json!({"action": "add", "key": "角色.背包.灵石.中品", "value": -10}),
    ]);
    assert_value(harness.doc(), "角色.背包.灵石.中品", json!(0));
    assert!(!log.entries()[1].warnings.is_empty());
}

#[tokio::test]
async fn test_capacity_raised_before_current_value() {
    let mut harness = TestHarness::new();
    let log = harness.apply(&[
        json!({"action": "set", "key": "角色.属性.气血.当前", "value": 150}),
        json!({"action": "set", "key": "角色.属性.气血.上限", "value": 150}),
    ]);
    assert_eq!(log.entries()[0].key, "角色.属性.气血.上限");
    assert_eq!(log.entries()[1].key, "角色.属性.气血.当前");
}

// =============================================================================
// Clock at its limits
// =============================================================================

#[tokio::test]
async fn test_clock_at_last_year_does_not_break_events() {
    let mut harness = TestHarness::with_config(EngineConfig::new());
    let log = harness.apply(&[json!({"action": "set", "key": "世界.时间.年", "value": i64::MAX})]);
    assert_applied(&log, "世界.时间.年");
    assert_eq!(harness.doc().clock().year, i64::MAX);

    let result = harness
        .session
        .tick_events(&mut StdRng::seed_from_u64(9))
        .await;
    assert!(matches!(
        result,
        Err(SessionError::Event(EventError::ClockOutOfRange(_)))
    ));
    assert_eq!(harness.get("世界.事件.下次事件时间"), Some(&json!(null)));

    harness.expect_turn("岁月无尽。", "", vec![]);
    let report = harness.input("等待").await.unwrap();
    assert!(report.event.is_none());
    assert!(report.notices.iter().any(|n| n.contains("no event can be scheduled")));
    assert_eq!(harness.session.collaborator().calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_clock_fields_are_carried() {
    let mut harness = TestHarness::new();
    harness.apply(&[json!({
        "action": "set",
        "key": "世界.时间",
        "value": {"年": 1000, "月": 12, "日": 31, "时": 25, "分": 61}
    })]);
    assert_eq!(harness.doc().clock(), ClockTime::new(1001, 1, 2, 2, 1));

    harness.apply(&[json!({"action": "add", "key": "世界.时间.年", "value": i64::MAX})]);
    assert_eq!(harness.doc().clock().month, 1);
}
