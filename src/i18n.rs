// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持中文（默认）和英文
// 阶段/类别的本地化标签统一从这里查表,
// 相等性判断永远基于枚举,不基于显示文本
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

use crate::domain::types::{Stage, TransferCategory};

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"zh-CN" 或 "en"）
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 翻译消息（无参数）
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（带参数）
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}

/// 阶段的本地化标签
pub fn stage_label(stage: Stage) -> String {
    t(stage.label_key())
}

/// 调拨类别的本地化标签
pub fn category_label(category: TransferCategory) -> String {
    t(category.label_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // rust-i18n 的 locale 为全局状态，且 Rust 测试默认并行执行；
    // 为避免测试互相干扰，这里对 i18n 相关测试串行化。
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        assert_eq!(current_locale(), "zh-CN");
    }

    #[test]
    fn test_stage_label_both_locales() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        assert_eq!(stage_label(Stage::Sorting), "分拣");

        set_locale("en");
        assert_eq!(stage_label(Stage::Sorting), "Sorting");

        // 标签切换不影响枚举身份
        assert_eq!(Stage::Sorting.to_db_str(), "SORTING");

        set_locale("zh-CN");
    }

    #[test]
    fn test_category_label() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        assert_eq!(category_label(TransferCategory::Waste), "废料");
        set_locale("en");
        assert_eq!(category_label(TransferCategory::Waste), "Waste");
        set_locale("zh-CN");
    }

    #[test]
    fn test_translate_with_args() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        let msg = t_with_args("transfer.insufficient_stock", &[("warehouse", "WH-SORT")]);
        assert!(msg.contains("WH-SORT"));
        set_locale("zh-CN");
    }
}
