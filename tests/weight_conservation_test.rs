// ==========================================
// 重量守恒集成测试
// ==========================================
// 职责: 分拣/裁切守恒法则端到端验证 + 平衡报表
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use paper_flow_mes::config::config_keys;
use paper_flow_mes::domain::types::TransferStatus;
use paper_flow_mes::domain::SortingOutputRequest;
use test_helpers::{create_order_with_material, reserve_and_extract, setup, sort_keeper};

fn sorting_request(
    order_id: &str,
    requirement_id: &str,
    input: f64,
    roll1: f64,
    roll2: f64,
    waste: f64,
) -> SortingOutputRequest {
    SortingOutputRequest {
        order_id: order_id.to_string(),
        requirement_id: requirement_id.to_string(),
        input_weight_kg: input,
        roll1_weight_kg: roll1,
        roll2_weight_kg: roll2,
        waste_weight_kg: waste,
        quality_grade: Some("A".to_string()),
    }
}

// ==========================================
// 场景A: 100kg → 60 + 35 + 5 验收通过
// ==========================================
#[tokio::test]
async fn test_sorting_accepted_spawns_transfers() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 100.0).await;

    let result = ctx
        .stage_api()
        .record_sorting_result(
            &sorting_request(&order_id, &requirement_id, 100.0, 60.0, 35.0, 5.0),
            &sort_keeper(),
        )
        .await
        .expect("分拣验收应通过");

    assert_eq!(result.pending_transfer_count, 2);
    assert_eq!(result.waste_transfer_count, 1);

    let transfers = ctx.transfer_repo.list_by_order(&order_id).unwrap();
    assert_eq!(transfers.len(), 3);

    let pending: Vec<_> = transfers
        .iter()
        .filter(|t| t.status == TransferStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|t| t.requires_sequential_approval));

    // 废料自动审批并处置完成,分拣仓可用量 100-5=95
    let waste = transfers
        .iter()
        .find(|t| t.category.is_waste())
        .expect("应存在废料调拨");
    assert_eq!(waste.status, TransferStatus::Completed);
    assert_eq!(waste.destination_warehouse_id, None);

    let available = ctx
        .stock_repo
        .available_quantity("WH-SORT", "KRAFT-120")
        .unwrap();
    assert!((available - 95.0).abs() < 1e-6);

    // 废料即时计入物料累计
    let requirement = ctx.material_repo.get(&requirement_id).unwrap();
    assert!((requirement.waste_weight_kg - 5.0).abs() < 1e-6);
}

// ==========================================
// 场景B: 100kg → 60 + 30 + 5 (合计95) 拒绝
// ==========================================
#[tokio::test]
async fn test_sorting_imbalance_rejected_zero_transfers() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 100.0).await;

    let err = ctx
        .stage_api()
        .record_sorting_result(
            &sorting_request(&order_id, &requirement_id, 100.0, 60.0, 30.0, 5.0),
            &sort_keeper(),
        )
        .await
        .expect_err("失衡应被拒绝");

    assert_eq!(err.error_code(), "IMBALANCE");
    assert!(err.to_string().contains("100"));
    assert!(err.to_string().contains("95"));

    // 零调拨落盘
    let transfers = ctx.transfer_repo.list_by_order(&order_id).unwrap();
    assert!(transfers.is_empty());
}

// ==========================================
// 分拣投入不得超过已提取重量
// ==========================================
#[tokio::test]
async fn test_sorting_input_exceeding_extraction_rejected() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 80.0).await;

    let err = ctx
        .stage_api()
        .record_sorting_result(
            &sorting_request(&order_id, &requirement_id, 100.0, 60.0, 35.0, 5.0),
            &sort_keeper(),
        )
        .await
        .expect_err("投入超提取应被拒绝");
    assert_eq!(err.error_code(), "INVALID_INPUT");
}

// ==========================================
// 裁切废料占比策略可配置
// ==========================================
#[tokio::test]
async fn test_cutting_waste_ceiling_configurable() {
    use paper_flow_mes::domain::CuttingOutputRequest;
    use paper_flow_mes::domain::types::Actor;

    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 100.0).await;

    // 走完分拣并完成两笔生产性调拨,使 sorted_weight 就位
    ctx.stage_api()
        .record_sorting_result(
            &sorting_request(&order_id, &requirement_id, 100.0, 60.0, 35.0, 5.0),
            &sort_keeper(),
        )
        .await
        .unwrap();
    let transfer_api = ctx.transfer_api();
    for t in ctx.transfer_repo.list_by_order(&order_id).unwrap() {
        if t.status == TransferStatus::Pending {
            transfer_api
                .approve_transfer(&t.transfer_id, "U-SORT-MGR", None)
                .await
                .unwrap();
            transfer_api
                .approve_transfer(&t.transfer_id, "U-CUT-MGR", None)
                .await
                .unwrap();
        }
    }

    let cutting = CuttingOutputRequest {
        order_id: order_id.clone(),
        requirement_id: requirement_id.clone(),
        input_weight_kg: 95.0,
        cut_weight_kg: 38.0,
        remainder_weight_kg: 8.0,
        waste_weight_kg: 49.0, // 占比 51.6% > 默认上限 50%
        quality_grade: None,
    };

    let err = ctx
        .stage_api()
        .record_cutting_result(&cutting, &Actor::user("U-CUT-KEEPER"))
        .await
        .expect_err("超限废料应被拒绝");
    assert_eq!(err.error_code(), "EXCESSIVE_WASTE");

    // 放宽上限后同样拆分通过
    ctx.config
        .set_global_config_value(config_keys::CUTTING_WASTE_CEILING, "0.8")
        .unwrap();
    ctx.stage_api()
        .record_cutting_result(&cutting, &Actor::user("U-CUT-KEEPER"))
        .await
        .expect("放宽上限后应通过");
}

// ==========================================
// 重量平衡报表
// ==========================================
#[tokio::test]
async fn test_weight_balance_report() {
    let ctx = setup();
    let (order_id, requirement_id) = create_order_with_material(&ctx, 100.0, false);
    reserve_and_extract(&ctx, &requirement_id, 100.0).await;

    ctx.stage_api()
        .record_sorting_result(
            &sorting_request(&order_id, &requirement_id, 100.0, 60.0, 35.0, 5.0),
            &sort_keeper(),
        )
        .await
        .unwrap();

    let report = ctx.report_api().get_weight_balance_report(&order_id).unwrap();
    assert!(report.is_balanced);
    assert_eq!(report.materials.len(), 1);

    let material = &report.materials[0];
    assert_eq!(material.stage_balances.len(), 1);
    let sorting_balance = &material.stage_balances[0];
    assert!(sorting_balance.is_balanced);
    assert!((sorting_balance.input_weight_kg - 100.0).abs() < 1e-6);
    assert!(sorting_balance.difference_kg.abs() <= 0.01);

    // 已完成类别合计: 仅废料 (生产性调拨尚未审批)
    assert!(report
        .completed_by_category
        .iter()
        .any(|(c, w)| c.is_waste() && (*w - 5.0).abs() < 1e-6));
}
