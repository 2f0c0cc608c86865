// ==========================================
// 流转编排端到端测试
// ==========================================
// 职责: 阶段推进就绪判定、未决调拨阻断、加急快速通道、迁移日志
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use paper_flow_mes::domain::types::{Actor, OrderStatus, Stage, StageStatus, TransferStatus};
use paper_flow_mes::domain::SortingOutputRequest;
use test_helpers::{create_order_with_material, reserve_and_extract, setup, sort_keeper, TestContext};

fn operator() -> Actor {
    Actor::user("U-SORT-KEEPER")
}

/// 建单 → 提取 → 预留阶段完成 → 推进至分拣 → 分拣验收
async fn drive_to_sorting_recorded(ctx: &TestContext, urgent: bool) -> (String, String) {
    let (order_id, requirement_id) = create_order_with_material(ctx, 100.0, urgent);
    reserve_and_extract(ctx, &requirement_id, 100.0).await;

    let pipeline = ctx.pipeline_api();
    pipeline
        .complete_current_stage(&order_id, &operator())
        .await
        .expect("预留阶段完成失败");
    let next = pipeline
        .advance_order(&order_id, &operator())
        .await
        .expect("推进至分拣失败");
    assert_eq!(next, Stage::Sorting);

    ctx.stage_api()
        .record_sorting_result(
            &SortingOutputRequest {
                order_id: order_id.clone(),
                requirement_id: requirement_id.clone(),
                input_weight_kg: 100.0,
                roll1_weight_kg: 60.0,
                roll2_weight_kg: 35.0,
                waste_weight_kg: 5.0,
                quality_grade: None,
            },
            &sort_keeper(),
        )
        .await
        .expect("分拣验收失败");

    (order_id, requirement_id)
}

// ==========================================
// 阶段处理未完成时不可推进
// ==========================================
#[tokio::test]
async fn test_incomplete_stage_blocks_advance() {
    let ctx = setup();
    let (order_id, _) = create_order_with_material(&ctx, 100.0, false);
    let pipeline = ctx.pipeline_api();

    let check = pipeline.can_advance(&order_id).await.unwrap();
    assert!(!check.allowed);
    assert!(check.reason.unwrap().contains("处理未完成"));

    let err = pipeline
        .advance_order(&order_id, &operator())
        .await
        .expect_err("未完成阶段不可推进");
    assert_eq!(err.error_code(), "STAGE_NOT_COMPLETED");
}

// ==========================================
// 未决调拨指向当前阶段时阻断推进
// ==========================================
#[tokio::test]
async fn test_pending_transfers_block_advance() {
    let ctx = setup();
    let (order_id, _) = drive_to_sorting_recorded(&ctx, false).await;
    let pipeline = ctx.pipeline_api();

    // 分拣完成 → 推进至裁切 (分拣派生的调拨指向裁切)
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    let next = pipeline.advance_order(&order_id, &operator()).await.unwrap();
    assert_eq!(next, Stage::Cutting);

    // 裁切阶段处理完成,但指向裁切的调拨还在审批 → 阻断
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    let check = pipeline.can_advance(&order_id).await.unwrap();
    assert!(!check.allowed);
    assert!(check.reason.unwrap().contains("未决调拨"));

    // 审批完成两笔调拨后解除阻断
    let transfer_api = ctx.transfer_api();
    for t in ctx.transfer_repo.list_by_order(&order_id).unwrap() {
        if t.status == TransferStatus::Pending {
            transfer_api.approve_transfer(&t.transfer_id, "U-SORT-MGR", None).await.unwrap();
            transfer_api.approve_transfer(&t.transfer_id, "U-CUT-MGR", None).await.unwrap();
        }
    }
    let check = pipeline.can_advance(&order_id).await.unwrap();
    assert!(check.allowed, "审批完成后应可推进: {:?}", check.reason);

    let next = pipeline.advance_order(&order_id, &operator()).await.unwrap();
    assert_eq!(next, Stage::Packaging);
}

// ==========================================
// 常规单: 包装 → 结算 → 收款 → 配送 → 交付
// ==========================================
#[tokio::test]
async fn test_full_pipeline_with_billing() {
    let ctx = setup();
    let (order_id, requirement_id) = drive_to_sorting_recorded(&ctx, false).await;
    let pipeline = ctx.pipeline_api();
    let transfer_api = ctx.transfer_api();

    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    pipeline.advance_order(&order_id, &operator()).await.unwrap(); // → Cutting
    for t in ctx.transfer_repo.list_by_order(&order_id).unwrap() {
        if t.status == TransferStatus::Pending {
            transfer_api.approve_transfer(&t.transfer_id, "U-SORT-MGR", None).await.unwrap();
            transfer_api.approve_transfer(&t.transfer_id, "U-CUT-MGR", None).await.unwrap();
        }
    }
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    pipeline.advance_order(&order_id, &operator()).await.unwrap(); // → Packaging
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();

    // 未收款,非加急: 下一阶段是结算
    let next = pipeline.advance_order(&order_id, &operator()).await.unwrap();
    assert_eq!(next, Stage::Billing);

    // 结算完成但未收款 → 配送前置不满足
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    let err = pipeline
        .advance_order(&order_id, &operator())
        .await
        .expect_err("未收款不可进入配送");
    assert_eq!(err.error_code(), "NO_NEXT_STAGE");

    pipeline.mark_payment_received(&order_id).unwrap();
    let next = pipeline.advance_order(&order_id, &operator()).await.unwrap();
    assert_eq!(next, Stage::Delivery);

    // 配送完成 → 订单交付,按已裁切口径落交付重量 (本单未裁切为 0)
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    let order = pipeline.get_order(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);

    // 终态订单不可再推进
    let err = pipeline
        .advance_order(&order_id, &operator())
        .await
        .expect_err("已交付订单不可推进");
    assert_eq!(err.error_code(), "ORDER_CLOSED");

    // 迁移日志完整且有序
    let log = pipeline.get_transition_log(&order_id).unwrap();
    let hops: Vec<(Stage, Stage)> = log.iter().map(|l| (l.previous_stage, l.new_stage)).collect();
    assert_eq!(
        hops,
        vec![
            (Stage::Reservation, Stage::Sorting),
            (Stage::Sorting, Stage::Cutting),
            (Stage::Cutting, Stage::Packaging),
            (Stage::Packaging, Stage::Billing),
            (Stage::Billing, Stage::Delivery),
        ]
    );

    let _ = requirement_id;
}

// ==========================================
// 加急单: 快速通道跳过结算
// ==========================================
#[tokio::test]
async fn test_urgent_order_skips_billing() {
    let ctx = setup();
    let (order_id, _) = drive_to_sorting_recorded(&ctx, true).await;
    let pipeline = ctx.pipeline_api();
    let transfer_api = ctx.transfer_api();

    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    pipeline.advance_order(&order_id, &operator()).await.unwrap(); // → Cutting
    for t in ctx.transfer_repo.list_by_order(&order_id).unwrap() {
        if t.status == TransferStatus::Pending {
            transfer_api.approve_transfer(&t.transfer_id, "U-SORT-MGR", None).await.unwrap();
            transfer_api.approve_transfer(&t.transfer_id, "U-CUT-MGR", None).await.unwrap();
        }
    }
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();
    pipeline.advance_order(&order_id, &operator()).await.unwrap(); // → Packaging
    pipeline.complete_current_stage(&order_id, &operator()).await.unwrap();

    // 加急且未收款: 跳过结算直达配送
    let next = pipeline.advance_order(&order_id, &operator()).await.unwrap();
    assert_eq!(next, Stage::Delivery);

    // 被跳过的结算阶段落 SKIPPED 处理行
    let billing = ctx
        .order_repo
        .get_processing(&order_id, Stage::Billing)
        .unwrap()
        .expect("结算处理行应存在");
    assert_eq!(billing.status, StageStatus::Skipped);
}

// ==========================================
// 取消订单后不可推进
// ==========================================
#[tokio::test]
async fn test_cancelled_order_cannot_advance() {
    let ctx = setup();
    let (order_id, _) = create_order_with_material(&ctx, 100.0, false);
    let pipeline = ctx.pipeline_api();

    pipeline.cancel_order(&order_id).unwrap();

    let check = pipeline.can_advance(&order_id).await.unwrap();
    assert!(!check.allowed);

    let err = pipeline
        .advance_order(&order_id, &operator())
        .await
        .expect_err("已取消订单不可推进");
    assert_eq!(err.error_code(), "ORDER_CLOSED");

    // 重复取消被拒绝
    let err = pipeline.cancel_order(&order_id).expect_err("重复取消应失败");
    assert_eq!(err.error_code(), "INVALID_INPUT");
}
