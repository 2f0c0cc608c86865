// ==========================================
// 调拨审批链端到端测试
// ==========================================
// 职责: 顺序审批、驳回、终态、完成校验与重试
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;
#[path = "helpers/test_data_builder.rs"]
mod test_data_builder;

use paper_flow_mes::domain::types::{Actor, TransferCategory, TransferStatus};
use paper_flow_mes::domain::SortingOutputRequest;
use test_helpers::{create_order_with_material, reserve_and_extract, setup, sort_keeper, TestContext};

/// 建单 → 提取 → 分拣验收,返回 (order_id, requirement_id, 生产性调拨ID列表)
async fn prepare_sorted_order(ctx: &TestContext) -> (String, String, Vec<String>) {
    let (order_id, requirement_id) = create_order_with_material(ctx, 100.0, false);
    reserve_and_extract(ctx, &requirement_id, 100.0).await;

    ctx.stage_api()
        .record_sorting_result(
            &SortingOutputRequest {
                order_id: order_id.clone(),
                requirement_id: requirement_id.clone(),
                input_weight_kg: 100.0,
                roll1_weight_kg: 60.0,
                roll2_weight_kg: 35.0,
                waste_weight_kg: 5.0,
                quality_grade: Some("A".to_string()),
            },
            &sort_keeper(),
        )
        .await
        .expect("分拣验收失败");

    // [0] = 分拣成卷(60kg), [1] = 分拣余卷(35kg)
    let mut pending: Vec<_> = ctx
        .transfer_repo
        .list_by_order(&order_id)
        .unwrap()
        .into_iter()
        .filter(|t| t.status == TransferStatus::Pending)
        .collect();
    pending.sort_by(|a, b| {
        b.weight_kg
            .partial_cmp(&a.weight_kg)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let pending: Vec<String> = pending.into_iter().map(|t| t.transfer_id).collect();
    (order_id, requirement_id, pending)
}

// ==========================================
// 场景C: 两级审批,乱序→顺序违规,顺序→完成
// ==========================================
#[tokio::test]
async fn test_two_level_sequential_approval() {
    let ctx = setup();
    let (_, requirement_id, pending) = prepare_sorted_order(&ctx).await;
    let transfer_id = &pending[0];
    let api = ctx.transfer_api();

    // 目的仓主管抢先审批 → 顺序违规
    let err = api
        .approve_transfer(transfer_id, "U-CUT-MGR", None)
        .await
        .expect_err("乱序审批应失败");
    assert_eq!(err.error_code(), "SEQUENCE_VIOLATION");

    // 源仓主管先批 (非末级,调拨仍 PENDING)
    let outcome = api
        .approve_transfer(transfer_id, "U-SORT-MGR", Some("卷面无破损".to_string()))
        .await
        .expect("一级审批应通过");
    assert!(!outcome.is_final);
    assert_eq!(outcome.transfer_status, TransferStatus::Pending);

    // 目的仓主管再批 (末级,自动完成并变更库存)
    let outcome = api
        .approve_transfer(transfer_id, "U-CUT-MGR", None)
        .await
        .expect("末级审批应通过");
    assert!(outcome.is_final);
    assert!(outcome.completion_error.is_none());
    assert_eq!(outcome.transfer_status, TransferStatus::Completed);

    // 库存: 60kg 从分拣仓移至裁切仓
    let sort_available = ctx.stock_repo.available_quantity("WH-SORT", "KRAFT-120").unwrap();
    let cut_available = ctx.stock_repo.available_quantity("WH-CUT", "KRAFT-120").unwrap();
    assert!((sort_available - 35.0).abs() < 1e-6);
    assert!((cut_available - 60.0).abs() < 1e-6);

    // 物料累计: 已分拣 60
    let requirement = ctx.material_repo.get(&requirement_id).unwrap();
    assert!((requirement.sorted_weight_kg - 60.0).abs() < 1e-6);
}

// ==========================================
// 场景D: 已完成调拨再次审批 → ALREADY_COMPLETED
// ==========================================
#[tokio::test]
async fn test_completed_transfer_is_terminal() {
    let ctx = setup();
    let (_, _, pending) = prepare_sorted_order(&ctx).await;
    let transfer_id = &pending[0];
    let api = ctx.transfer_api();

    api.approve_transfer(transfer_id, "U-SORT-MGR", None).await.unwrap();
    api.approve_transfer(transfer_id, "U-CUT-MGR", None).await.unwrap();

    let err = api
        .approve_transfer(transfer_id, "U-SORT-MGR", None)
        .await
        .expect_err("终态调拨不可再审批");
    assert_eq!(err.error_code(), "ALREADY_COMPLETED");

    let err = api
        .reject_transfer(transfer_id, "U-SORT-MGR", "不需要了,驳回处理")
        .await
        .expect_err("终态调拨不可驳回");
    assert_eq!(err.error_code(), "ALREADY_COMPLETED");
}

// ==========================================
// 无关用户 → UNAUTHORIZED
// ==========================================
#[tokio::test]
async fn test_unrelated_user_unauthorized() {
    let ctx = setup();
    let (_, _, pending) = prepare_sorted_order(&ctx).await;
    let api = ctx.transfer_api();

    let err = api
        .approve_transfer(&pending[0], "U-PACK-MGR", None)
        .await
        .expect_err("无关主管应无权限");
    assert_eq!(err.error_code(), "UNAUTHORIZED");

    // 系统哨兵不得出现在人工审批链
    let err = ctx
        .transfer_api()
        .complete_transfer(&pending[0], &Actor::System)
        .await
        .expect_err("未审批完毕不可完成");
    assert_eq!(err.error_code(), "NOT_YET_APPROVED");
}

// ==========================================
// 驳回: 原因过短拒绝,驳回后终态
// ==========================================
#[tokio::test]
async fn test_reject_requires_reason_and_is_terminal() {
    let ctx = setup();
    let (_, _, pending) = prepare_sorted_order(&ctx).await;
    let transfer_id = &pending[1];
    let api = ctx.transfer_api();

    let err = api
        .reject_transfer(transfer_id, "U-SORT-MGR", "短")
        .await
        .expect_err("过短原因应被拒绝");
    assert_eq!(err.error_code(), "REASON_TOO_SHORT");

    api.reject_transfer(transfer_id, "U-SORT-MGR", "克重不符合规格要求")
        .await
        .expect("正常驳回应成功");

    let transfer = ctx.transfer_repo.get(transfer_id).unwrap();
    assert_eq!(transfer.status, TransferStatus::Rejected);

    // 驳回后不可复活
    let err = api
        .approve_transfer(transfer_id, "U-SORT-MGR", None)
        .await
        .expect_err("已驳回调拨不可审批");
    assert_eq!(err.error_code(), "ALREADY_REJECTED");

    // 从未发生库存变更 (分拣仓仍有 95)
    let available = ctx.stock_repo.available_quantity("WH-SORT", "KRAFT-120").unwrap();
    assert!((available - 95.0).abs() < 1e-6);
}

// ==========================================
// 前置核验请求未完成 → REQUESTS_PENDING
// ==========================================
#[tokio::test]
async fn test_open_verification_blocks_decision() {
    let ctx = setup();
    let (_, _, pending) = prepare_sorted_order(&ctx).await;
    let transfer_id = &pending[0];
    let api = ctx.transfer_api();

    let request_id = api
        .create_verification_request(transfer_id, "INVENTORY_CHECK")
        .unwrap();

    let err = api
        .approve_transfer(transfer_id, "U-SORT-MGR", None)
        .await
        .expect_err("核验未完成应阻断审批");
    assert_eq!(err.error_code(), "REQUESTS_PENDING");

    api.complete_verification_request(&request_id).unwrap();
    api.approve_transfer(transfer_id, "U-SORT-MGR", None)
        .await
        .expect("核验完成后应可审批");
}

// ==========================================
// 无幻影完成: 完成时库存不足 → 停留 APPROVED,可重试
// ==========================================
#[tokio::test]
async fn test_no_phantom_completion_retryable() {
    let ctx = setup();
    let (_, _, pending) = prepare_sorted_order(&ctx).await;
    let transfer_id = &pending[0];
    let api = ctx.transfer_api();

    api.approve_transfer(transfer_id, "U-SORT-MGR", None).await.unwrap();

    // 末级审批前抽干分拣仓库存
    ctx.stock_repo.remove("WH-SORT", "KRAFT-120", 95.0).unwrap();

    let outcome = api
        .approve_transfer(transfer_id, "U-CUT-MGR", None)
        .await
        .expect("末级审批本身应成功");
    assert!(outcome.is_final);
    assert_eq!(outcome.transfer_status, TransferStatus::Approved);
    let completion_err = outcome.completion_error.expect("完成应失败");
    assert_eq!(completion_err.error_code(), "INSUFFICIENT_STOCK");

    // 调拨停留 APPROVED,裁切仓无任何入库
    let transfer = ctx.transfer_repo.get(transfer_id).unwrap();
    assert_eq!(transfer.status, TransferStatus::Approved);
    let cut_available = ctx.stock_repo.available_quantity("WH-CUT", "KRAFT-120").unwrap();
    assert!(cut_available.abs() < 1e-6);

    // 补回库存后重试完成
    ctx.stock_repo.add("WH-SORT", "KRAFT-120", 95.0).unwrap();
    api.complete_transfer(transfer_id, &Actor::user("U-CUT-MGR"))
        .await
        .expect("补库后重试应完成");

    let transfer = ctx.transfer_repo.get(transfer_id).unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    let cut_available = ctx.stock_repo.available_quantity("WH-CUT", "KRAFT-120").unwrap();
    assert!((cut_available - 60.0).abs() < 1e-6);
}

// ==========================================
// 场景E: 裁切组缺少废料调拨 → CUTTING_VALIDATION_FAILED
// ==========================================
#[tokio::test]
async fn test_cutting_group_missing_waste_blocks_completion() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 100.0).await;

    // 裁切仓备足库存
    ctx.stock_repo.add("WH-CUT", "KRAFT-120", 100.0).unwrap();

    // 裁切产出: cut=40, waste=5, remainder=0
    let output_id = test_data_builder::insert_cutting_output(
        &ctx.conn,
        &order_id,
        &requirement_id,
        45.0,
        40.0,
        0.0,
        5.0,
        true,
    );

    // 组内只有 cut_material 调拨,缺少废料调拨
    let group_id = "GRP-E2E-MISSING-WASTE";
    let cut_transfer_id = test_data_builder::insert_transfer_with_chain(
        &ctx.conn,
        &order_id,
        &requirement_id,
        Some(&output_id),
        TransferCategory::CutMaterial,
        40.0,
        "WH-CUT",
        Some("WH-PACK"),
        group_id,
        paper_flow_mes::domain::types::TransferStatus::Pending,
        &["WH-CUT", "WH-PACK"],
    );

    let api = ctx.transfer_api();
    api.approve_transfer(&cut_transfer_id, "U-CUT-MGR", None).await.unwrap();
    let outcome = api
        .approve_transfer(&cut_transfer_id, "U-PACK-MGR", None)
        .await
        .expect("末级审批本身应成功");

    let completion_err = outcome.completion_error.expect("组不完整时完成应失败");
    assert_eq!(completion_err.error_code(), "CUTTING_VALIDATION_FAILED");
    assert_eq!(
        ctx.transfer_repo.get(&cut_transfer_id).unwrap().status,
        TransferStatus::Approved
    );

    // 补齐废料调拨后重试完成
    test_data_builder::insert_transfer_with_chain(
        &ctx.conn,
        &order_id,
        &requirement_id,
        Some(&output_id),
        TransferCategory::Waste,
        5.0,
        "WH-CUT",
        None,
        group_id,
        paper_flow_mes::domain::types::TransferStatus::Approved,
        &[],
    );

    api.complete_transfer(&cut_transfer_id, &Actor::user("U-PACK-MGR"))
        .await
        .expect("组补齐后重试应完成");
    assert_eq!(
        ctx.transfer_repo.get(&cut_transfer_id).unwrap().status,
        TransferStatus::Completed
    );
}
