use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    definitions::shared::{FileInfo, FragmentInfo},
    downloader::state::{
        part_path, FileId, FileProgress, FileRecord, FileState, FileStatus, FragmentTask,
        OnComplete,
    },
    error::DriveError,
};

/// Everything one `prepare` call produced, ready to merge into the engine.
#[derive(Debug, Default)]
pub struct DownloadPlan {
    pub tasks: Vec<FragmentTask>,
    /// Files with every fragment already on disk; they skip straight to
    /// finalize.
    pub finalize_ready: Vec<FileId>,
    pub states: HashMap<FileId, Arc<FileState>>,
    pub records: HashMap<FileId, Arc<FileRecord>>,
    /// Bytes still missing, for progress estimation.
    pub size_estimate: u64,
}

/// Reconciles fetched plans with whatever `.part` files are already on
/// disk.
///
/// This is the only place disk state turns into logical progress, which is
/// what makes resume-after-crash transparent: rerunning the same calls
/// after a restart reproduces the queues and states without any server
/// coordination. `prepare` is idempotent.
#[derive(Debug)]
pub struct TaskPlanner {
    temp_root: PathBuf,
}

impl TaskPlanner {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    pub async fn prepare(
        &self,
        files: Vec<FileInfo>,
        output_dir: &Path,
        on_complete: Option<OnComplete>,
    ) -> Result<DownloadPlan, DriveError> {
        let mut plan = DownloadPlan::default();

        for file in files {
            let file_dir = self.temp_root.join(&file.id);
            tokio::fs::create_dir_all(&file_dir).await?;

            let (missing, bytes_present) = reconcile_parts(&file_dir, &file.fragments).await?;
            let total = file.fragments.len() as u32;
            let downloaded = total - missing.len() as u32;
            plan.size_estimate += missing.iter().map(|fragment| fragment.size).sum::<u64>();

            let status = if missing.is_empty() || downloaded == 0 {
                FileStatus::Pending
            } else {
                FileStatus::Paused
            };

            let state = Arc::new(FileState::new(
                FileProgress {
                    fragments_total: total,
                    fragments_downloaded: downloaded,
                    size_total: file.size,
                    bytes_downloaded: bytes_present,
                },
                status,
            ));

            let record = Arc::new(FileRecord {
                merged_path: file_dir.join(format!("{}.encrypted", file.name)),
                output_path: file_dir.join(&file.name),
                output_dir: output_dir.to_path_buf(),
                file_dir,
                on_complete: on_complete.clone(),
                file_info: file.clone(),
            });

            if missing.is_empty() {
                plan.finalize_ready.push(file.id.clone());
            } else {
                for fragment in missing {
                    plan.tasks.push(FragmentTask {
                        file_id: file.id.clone(),
                        file_name: file.name.clone(),
                        fragment,
                        file_password: file.password.clone(),
                        retries: 0,
                    });
                }
            }

            plan.states.insert(file.id.clone(), state);
            plan.records.insert(file.id.clone(), record);
        }

        Ok(plan)
    }
}

/// Splits fragments into missing and present. A part with the wrong size is
/// deleted and treated as missing.
async fn reconcile_parts(
    file_dir: &Path,
    fragments: &[FragmentInfo],
) -> Result<(Vec<FragmentInfo>, u64), DriveError> {
    let mut missing = Vec::new();
    let mut bytes_present = 0u64;

    for fragment in fragments {
        let part = part_path(file_dir, fragment.sequence);
        match tokio::fs::metadata(&part).await {
            Ok(meta) if meta.len() == fragment.size => bytes_present += fragment.size,
            Ok(_) => {
                tracing::warn!(
                    part = %part.display(),
                    "part size mismatch, discarding"
                );
                tokio::fs::remove_file(&part).await?;
                missing.push(fragment.clone());
            }
            Err(_) => missing.push(fragment.clone()),
        }
    }

    Ok((missing, bytes_present))
}
