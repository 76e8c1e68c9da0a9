//! 答卷处理上下文
//!
//! 封装"我正在处理哪一份答卷"这一信息，用于日志前缀

use std::fmt::Display;

use uuid::Uuid;

/// 答卷处理上下文
#[derive(Debug, Clone)]
pub struct SheetCtx {
    /// 答卷ID
    pub sheet_id: Uuid,

    /// 答卷在批次中的序号（从1开始，仅用于日志显示）
    pub sheet_index: usize,

    /// 原始文件名
    pub filename: String,
}

impl SheetCtx {
    /// 创建新的答卷上下文
    pub fn new(sheet_id: Uuid, sheet_index: usize, filename: impl Into<String>) -> Self {
        Self {
            sheet_id,
            sheet_index,
            filename: filename.into(),
        }
    }
}

impl Display for SheetCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[答卷 {} {}]", self.sheet_index, self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefix() {
        let ctx = SheetCtx::new(Uuid::nil(), 3, "scan_003.pdf");
        assert_eq!(ctx.to_string(), "[答卷 3 scan_003.pdf]");
    }
}
