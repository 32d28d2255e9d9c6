//! Turning the pending uploads of a committed save into queued tasks.

use chrono::Utc;
use podium_core::block::props::set_failed;
use podium_core::reconcile::AppliedBlock;
use podium_core::upload::{
    PendingUpload, UploadTask, primary_destination, random_token, temp_file_name,
};
use tracing::{error, warn};

use super::UploadQueue;
use crate::db::SiteRepo;
use crate::storage::{Body, Storage, StorageSet};

/// Write each pending file to temp storage and enqueue its task.
///
/// Runs after the save transaction committed, so every upload can address
/// its block by durable id. A file that cannot be staged marks its prop as
/// failed instead of failing the save. Returns the number of queued tasks.
pub async fn stage_uploads(
    repo: &SiteRepo,
    storage: &StorageSet,
    queue: &UploadQueue,
    website_id: i64,
    applied: &[AppliedBlock],
    uploads: Vec<PendingUpload>,
) -> usize {
    let mut queued = 0;
    for upload in uploads {
        let Some(block) = applied.get(upload.block_index) else {
            error!(
                "Pending upload refers to block index {} outside the saved list",
                upload.block_index
            );
            continue;
        };

        let extension = upload
            .attachment
            .extension()
            .unwrap_or_else(|| "bin".to_string());
        let temp_path = temp_file_name(block.id, &upload.prop_name, &random_token(), &extension);
        let task = UploadTask {
            website_id,
            block_id: block.id,
            destination_path: primary_destination(
                website_id,
                block.id,
                &random_token(),
                Utc::now().timestamp(),
                &extension,
            ),
            temp_path,
            prop_name: upload.prop_name,
        };

        let staged = storage
            .temp
            .put(&task.temp_path, Body::Bytes(upload.attachment.bytes))
            .await;
        let enqueued = staged
            && match queue.enqueue(task.clone()) {
                Ok(()) => true,
                Err(e) => {
                    storage.temp.delete(&task.temp_path).await;
                    warn!("{}", e);
                    false
                }
            };

        if enqueued {
            queued += 1;
            continue;
        }

        error!(
            "Could not stage upload of {} for block {}",
            task.prop_name, task.block_id
        );
        if let Err(e) = repo.merge_block_props(website_id, task.block_id, |props| {
            set_failed(props, &task.prop_name)
        }) {
            warn!("Could not flag failed upload on block {}: {}", task.block_id, e);
        }
    }
    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::storage::LocalDisk;
    use crate::uploads::upload_queue;
    use podium_core::block::props::{failed_flag_key, set_uploading};
    use podium_core::reconcile::PreparedBlock;
    use podium_core::upload::Attachment;
    use podium_core::{Block, BlockId, BlockType};
    use rusqlite::Connection;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Arc<SiteRepo>, StorageSet, i64, Vec<AppliedBlock>) {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(SiteRepo::new(conn));
        let team_id = repo.create_team("Team").unwrap();
        let event_id = repo.create_event(team_id, "Expo", None).unwrap();
        let event = repo.get_event(event_id).unwrap().unwrap();
        let website = repo
            .create_website(&event, &Default::default())
            .unwrap()
            .unwrap();

        let mut block = PreparedBlock::from_block(Block::new(
            BlockId::parse("Hero-1"),
            BlockType::Hero,
            serde_json::from_value(json!({})).unwrap(),
        ));
        set_uploading(&mut block.props, "imageUrl");
        block.uploads = vec!["imageUrl".to_string()];
        let saved = repo.save_website(website.id, vec![block], None, None).unwrap();

        let storage = StorageSet::new(
            Arc::new(LocalDisk::new(dir.path().join("temp"), "http://x.test/temp")),
            None,
            Arc::new(LocalDisk::new(dir.path().join("public"), "http://x.test/storage")),
        );
        (repo, storage, website.id, saved.applied)
    }

    fn pending(index: usize) -> PendingUpload {
        PendingUpload {
            block_index: index,
            prop_name: "imageUrl".to_string(),
            attachment: Attachment {
                field: "blocks.0.props._pendingFile_imageUrl".to_string(),
                filename: "photo.PNG".to_string(),
                content_type: Some("image/png".to_string()),
                bytes: b"png".to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn test_stage_writes_temp_file_and_queues_task() {
        let dir = TempDir::new().unwrap();
        let (repo, storage, website_id, applied) = setup(&dir);
        let (queue, receiver) = upload_queue();

        let queued =
            stage_uploads(&repo, &storage, &queue, website_id, &applied, vec![pending(0)]).await;
        assert_eq!(queued, 1);

        let task = receiver.next().await.unwrap();
        assert_eq!(task.block_id, applied[0].id);
        assert!(task.temp_path.starts_with(&format!("block-{}-imageUrl-", applied[0].id)));
        assert!(task.temp_path.ends_with(".png"));
        assert!(
            task.destination_path
                .starts_with(&format!("blocks/{}/{}/", website_id, applied[0].id))
        );
        assert!(storage.temp.exists(&task.temp_path).await);
    }

    #[tokio::test]
    async fn test_closed_queue_flags_prop_failed() {
        let dir = TempDir::new().unwrap();
        let (repo, storage, website_id, applied) = setup(&dir);
        let (queue, receiver) = upload_queue();
        drop(receiver);

        let queued =
            stage_uploads(&repo, &storage, &queue, website_id, &applied, vec![pending(0)]).await;
        assert_eq!(queued, 0);

        let props = &repo.list_blocks(website_id).unwrap()[0].props;
        assert_eq!(props[&failed_flag_key("imageUrl")], json!(true));
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (repo, storage, website_id, applied) = setup(&dir);
        let (queue, _receiver) = upload_queue();

        let queued =
            stage_uploads(&repo, &storage, &queue, website_id, &applied, vec![pending(5)]).await;
        assert_eq!(queued, 0);
        assert_eq!(queue.pending(), 0);
    }
}
