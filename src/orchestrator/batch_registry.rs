//! 批次登记表 - 编排层
//!
//! 进程内保存所有批次的进度，供轮询接口读取。
//! 抽象为 [`BatchRegistry`]，调用方不关心背后是并发 Map 还是外部缓存。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult, BusinessError};
use crate::models::{BatchJob, BatchState, SheetOutcome, StatusEntry};

/// 批次登记能力
#[async_trait]
pub trait BatchRegistry: Send + Sync {
    /// 登记一个新批次
    async fn register(&self, job: BatchJob) -> AppResult<()>;
    /// 记录一份答卷的最终结果（计数原子递增）
    async fn record(&self, batch_id: Uuid, entry: StatusEntry) -> AppResult<()>;
    /// 标记批次开始运行
    async fn mark_running(&self, batch_id: Uuid) -> AppResult<()>;
    /// 读取批次快照
    async fn snapshot(&self, batch_id: Uuid) -> Option<BatchJob>;
}

const SUCCESS_SHIFT: u32 = 32;
const FAILED_MASK: u64 = (1 << SUCCESS_SHIFT) - 1;

/// 成功/失败计数打包在一个原子量里：高 32 位成功，低 32 位失败
///
/// 已处理数 = 成功 + 失败，任何时刻读到的三者都一致
#[derive(Debug, Default)]
struct PackedCounters(AtomicU64);

impl PackedCounters {
    fn increment(&self, outcome: SheetOutcome) {
        let delta = match outcome {
            SheetOutcome::Success => 1 << SUCCESS_SHIFT,
            SheetOutcome::Failed => 1,
        };
        self.0.fetch_add(delta, Ordering::AcqRel);
    }

    /// (成功, 失败)
    fn load(&self) -> (usize, usize) {
        let packed = self.0.load(Ordering::Acquire);
        ((packed >> SUCCESS_SHIFT) as usize, (packed & FAILED_MASK) as usize)
    }
}

#[derive(Debug)]
struct BatchEntry {
    batch_id: Uuid,
    total_files: usize,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    counters: PackedCounters,
    statuses: Mutex<Vec<StatusEntry>>,
}

impl BatchEntry {
    fn state(&self, processed: usize) -> BatchState {
        if processed >= self.total_files {
            BatchState::Completed
        } else if self.running.load(Ordering::Acquire) || processed > 0 {
            BatchState::Running
        } else {
            BatchState::Created
        }
    }
}

/// 内存批次登记表（进程生命周期内有效，不持久化）
#[derive(Debug, Default)]
pub struct InMemoryBatchRegistry {
    batches: RwLock<HashMap<Uuid, Arc<BatchEntry>>>,
}

impl InMemoryBatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, batch_id: Uuid) -> AppResult<Arc<BatchEntry>> {
        self.batches
            .read()
            .map_err(|_| AppError::Other("批次登记表锁已损坏".to_string()))?
            .get(&batch_id)
            .cloned()
            .ok_or_else(|| {
                BusinessError::BatchNotFound {
                    batch_id: batch_id.to_string(),
                }
                .into()
            })
    }

    /// 无锁读取进度：(已处理, 成功, 失败)
    pub fn progress(&self, batch_id: Uuid) -> Option<(usize, usize, usize)> {
        let entry = self.entry(batch_id).ok()?;
        let (success, failed) = entry.counters.load();
        Some((success + failed, success, failed))
    }
}

#[async_trait]
impl BatchRegistry for InMemoryBatchRegistry {
    async fn register(&self, job: BatchJob) -> AppResult<()> {
        let entry = Arc::new(BatchEntry {
            batch_id: job.batch_id,
            total_files: job.total_files,
            started_at: job.started_at,
            running: AtomicBool::new(job.state == BatchState::Running),
            counters: PackedCounters::default(),
            statuses: Mutex::new(Vec::with_capacity(job.total_files)),
        });
        self.batches
            .write()
            .map_err(|_| AppError::Other("批次登记表锁已损坏".to_string()))?
            .insert(job.batch_id, entry);
        Ok(())
    }

    async fn record(&self, batch_id: Uuid, entry: StatusEntry) -> AppResult<()> {
        let batch = self.entry(batch_id)?;
        let mut statuses = batch
            .statuses
            .lock()
            .map_err(|_| AppError::Other("批次状态锁已损坏".to_string()))?;

        let (success, failed) = batch.counters.load();
        if success + failed >= batch.total_files {
            return Err(BusinessError::InvalidRequest(format!(
                "批次 {} 已处理完全部 {} 份答卷",
                batch_id, batch.total_files
            ))
            .into());
        }

        // 追加状态与递增计数在同一把锁内完成，快照不会看到半更新状态
        batch.counters.increment(entry.outcome);
        statuses.push(entry);
        Ok(())
    }

    async fn mark_running(&self, batch_id: Uuid) -> AppResult<()> {
        let batch = self.entry(batch_id)?;
        batch.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn snapshot(&self, batch_id: Uuid) -> Option<BatchJob> {
        let batch = self.entry(batch_id).ok()?;
        let statuses = batch.statuses.lock().ok()?;
        let (success, failed) = batch.counters.load();
        let processed = success + failed;

        Some(BatchJob {
            batch_id: batch.batch_id,
            state: batch.state(processed),
            total_files: batch.total_files,
            processed_count: processed,
            success_count: success,
            failed_count: failed,
            started_at: batch.started_at,
            statuses: statuses.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_counters() {
        let counters = PackedCounters::default();
        counters.increment(SheetOutcome::Success);
        counters.increment(SheetOutcome::Failed);
        counters.increment(SheetOutcome::Success);
        assert_eq!(counters.load(), (2, 1));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let registry = InMemoryBatchRegistry::new();
        let job = BatchJob::new(2);
        let id = job.batch_id;
        registry.register(job).await.unwrap();

        let snap = registry.snapshot(id).await.unwrap();
        assert_eq!(snap.state, BatchState::Created);

        tokio_test::assert_ok!(registry.mark_running(id).await);
        tokio_test::assert_ok!(
            registry
                .record(id, StatusEntry::success("a.png", Uuid::new_v4(), "202012345"))
                .await
        );
        let snap = registry.snapshot(id).await.unwrap();
        assert_eq!(snap.state, BatchState::Running);
        assert_eq!((snap.processed_count, snap.success_count, snap.failed_count), (1, 1, 0));

        registry
            .record(id, StatusEntry::failed("b.pdf", Uuid::new_v4(), "文档无法读取"))
            .await
            .unwrap();
        let snap = registry.snapshot(id).await.unwrap();
        assert!(snap.is_completed());
        assert_eq!(snap.statuses.len(), 2);

        // 已完成的批次不再接受结果
        assert!(registry
            .record(id, StatusEntry::failed("c.pdf", Uuid::new_v4(), "x"))
            .await
            .is_err());
        assert_eq!(registry.progress(id), Some((2, 1, 1)));
    }

    #[tokio::test]
    async fn test_running_flag_without_results() {
        let registry = InMemoryBatchRegistry::new();
        let mut job = BatchJob::new(3);
        job.state = BatchState::Running;
        let id = job.batch_id;
        registry.register(job).await.unwrap();

        let snap = registry.snapshot(id).await.unwrap();
        assert_eq!(snap.state, BatchState::Running);
        assert_eq!(snap.processed_count, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_completed() {
        let registry = InMemoryBatchRegistry::new();
        let job = BatchJob::new(0);
        let id = job.batch_id;
        registry.register(job).await.unwrap();
        assert!(registry.snapshot(id).await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let registry = InMemoryBatchRegistry::new();
        assert!(registry.snapshot(Uuid::new_v4()).await.is_none());
        tokio_test::assert_err!(registry.mark_running(Uuid::new_v4()).await);
        tokio_test::assert_err!(
            registry
                .record(Uuid::new_v4(), StatusEntry::failed("x.png", Uuid::new_v4(), "x"))
                .await
        );
    }

    #[tokio::test]
    async fn test_concurrent_records_keep_invariant() {
        let registry = Arc::new(InMemoryBatchRegistry::new());
        let job = BatchJob::new(64);
        let id = job.batch_id;
        registry.register(job).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let entry = if i % 3 == 0 {
                    StatusEntry::failed(format!("{}.png", i), Uuid::new_v4(), "x")
                } else {
                    StatusEntry::success(format!("{}.png", i), Uuid::new_v4(), "1234567")
                };
                registry.record(id, entry).await.unwrap();
                let snap = registry.snapshot(id).await.unwrap();
                assert_eq!(snap.success_count + snap.failed_count, snap.processed_count);
                assert!(snap.processed_count <= snap.total_files);
                assert_eq!(snap.statuses.len(), snap.processed_count);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = registry.snapshot(id).await.unwrap();
        assert_eq!(snap.processed_count, 64);
        assert_eq!(snap.failed_count, 22);
        assert!(snap.is_completed());
    }
}
