// ==========================================
// 并发控制测试
// ==========================================
// 职责: 库存条件扣减 (CAS 语义) 与审批竞争的串行化验证
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;
#[path = "helpers/test_data_builder.rs"]
mod test_data_builder;

use paper_flow_mes::domain::types::{Actor, Role, TransferCategory, TransferStatus};
use paper_flow_mes::engine::approval::ApprovalService;
use paper_flow_mes::engine::weight::WeightPolicy;
use std::sync::Arc;
use std::thread;
use test_helpers::{create_order_with_material, setup, TestContext};

// ==========================================
// 库存扣减竞争: 50kg 库存,10 线程各扣 10kg → 恰好 5 成功
// ==========================================
#[test]
fn test_stock_conditional_decrement_under_contention() {
    let ctx = setup();
    ctx.stock_repo.add("WH-CUT", "KRAFT-120", 50.0).unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let stock_repo = ctx.stock_repo.clone();
        handles.push(thread::spawn(move || {
            stock_repo.remove("WH-CUT", "KRAFT-120", 10.0).is_ok()
        }));
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 5, "条件扣减应恰好允许 5 次成功");

    let available = ctx
        .stock_repo
        .available_quantity("WH-CUT", "KRAFT-120")
        .unwrap();
    assert!(available.abs() < 1e-6, "库存应被扣至 0,实际 {}", available);
}

// ==========================================
// 预留竞争: 可用量不足时预留被拒绝
// ==========================================
#[test]
fn test_reserve_contention_never_oversells() {
    let ctx = setup();
    // WH-RAW 初始 1000kg,12 线程各预留 100kg → 至多 10 成功
    let mut handles = Vec::new();
    for _ in 0..12 {
        let stock_repo = ctx.stock_repo.clone();
        handles.push(thread::spawn(move || {
            stock_repo.reserve("WH-RAW", "KRAFT-120", 100.0).is_ok()
        }));
    }
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 10);

    let entry = ctx.stock_repo.get("WH-RAW", "KRAFT-120").unwrap().unwrap();
    assert!((entry.reserved_kg - 1000.0).abs() < 1e-6);
    assert!(entry.available_kg().abs() < 1e-6);
}

// ==========================================
// 审批竞争: 单层级调拨,两主管同时裁决 → 恰好一次生效
// ==========================================
#[test]
fn test_racing_approvers_serialized() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    ctx.stock_repo.add("WH-SORT", "KRAFT-120", 100.0).unwrap();

    // 同仓第二位主管
    ctx.user_role_repo
        .grant("U-SORT-MGR-2", Role::WarehouseManager, "WH-SORT")
        .unwrap();

    // 单层级审批链 (源仓 = 目的仓,合并为一级)
    let transfer_id = test_data_builder::insert_transfer_with_chain(
        &ctx.conn,
        &order_id,
        &requirement_id,
        None,
        TransferCategory::SortedMaterial,
        60.0,
        "WH-SORT",
        Some("WH-SORT"),
        "GRP-RACE",
        TransferStatus::Pending,
        &["WH-SORT"],
    );

    let service = Arc::new(build_service(&ctx));

    let mut handles = Vec::new();
    for approver in ["U-SORT-MGR", "U-SORT-MGR-2"] {
        let service = service.clone();
        let transfer_id = transfer_id.clone();
        handles.push(thread::spawn(move || {
            service
                .approve(&transfer_id, &Actor::user(approver), None)
                .map(|outcome| outcome.transfer_status)
                .map_err(|e| e.error_code())
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "两个竞争审批只能一次生效: {:?}", results);

    // 败方得到并发/终态类错误,而非静默成功
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    let code = loser.as_ref().err().unwrap();
    assert!(
        [
            "CONCURRENT_DECISION",
            "ALREADY_APPROVED",
            "ALREADY_COMPLETED",
            "CHAIN_MISSING",
        ]
        .contains(code),
        "意外错误码: {}",
        code
    );

    // 库存恰好移动一次 (同仓调拨,总量不变但只发生一次完成)
    let transfer = ctx.transfer_repo.get(&transfer_id).unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    let chain = ctx.approval_repo.list_for_transfer(&transfer_id).unwrap();
    assert_eq!(chain.len(), 1);

    // 物料累计只追加一次
    let requirement = ctx.material_repo.get(&requirement_id).unwrap();
    assert!((requirement.sorted_weight_kg - 60.0).abs() < 1e-6);
}

fn build_service(
    ctx: &TestContext,
) -> ApprovalService<paper_flow_mes::repository::UserRoleRepository> {
    ApprovalService::new(
        ctx.conn.clone(),
        ctx.transfer_repo.clone(),
        ctx.approval_repo.clone(),
        ctx.verification_repo.clone(),
        ctx.audit_repo.clone(),
        ctx.user_role_repo.clone(),
        WeightPolicy::default(),
        5,
    )
}
