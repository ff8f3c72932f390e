use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::core::object::{ContentId, ContentObject};
use crate::core::schema::{AttributeKind, AttributeType, ObjectType};
use crate::core::value::Value;
use crate::state::RunStatus;

const FOLDER: i32 = 10002;

async fn repository(dir: &TempDir, file: &str) -> Arc<SqliteRepository> {
    let url = format!("sqlite:{}", dir.path().join(file).display());
    let repo = SqliteRepository::connect_url(&url).await.unwrap();
    repo.init_schema().await.unwrap();
    Arc::new(repo)
}

async fn install(repo: &SqliteRepository, object_type: &ObjectType) {
    let mut catalog = SchemaCatalog::load(repo).await.unwrap();
    catalog.save_object_type(repo, object_type).await.unwrap();
    for attr in &object_type.attributes {
        catalog.save_attribute_type(repo, attr, true).await.unwrap();
    }
}

fn folder(attrs: Vec<AttributeType>) -> ObjectType {
    attrs
        .into_iter()
        .fold(ObjectType::new(FOLDER, "folder"), |t, a| t.with_attribute(a))
}

fn text(name: &str) -> AttributeType {
    AttributeType::new(FOLDER, name, AttributeKind::Text)
}

fn object(id: i32) -> ContentObject {
    ContentObject::new(ContentId::new(FOLDER, id))
        .with_node(1)
        .with_timestamp(100)
}

fn options() -> SyncOptions {
    SyncOptions {
        allow_empty: true,
        ..SyncOptions::default()
    }
}

fn executor(
    source: &Arc<SqliteRepository>,
    target: &Arc<SqliteRepository>,
    options: SyncOptions,
) -> SyncExecutor {
    SyncExecutor::new(source.clone(), target.clone(), options)
        .with_rule_parser(&ExpressionParser::new())
        .unwrap()
}

async fn values(repo: &SqliteRepository, id: i32, attr: &AttributeType) -> Vec<Value> {
    let id = ContentId::new(FOLDER, id);
    repo.load_attributes(&[id], &[attr])
        .await
        .unwrap()
        .remove(&id)
        .and_then(|mut m| m.remove(&attr.name))
        .unwrap_or_default()
}

async fn value_rows(repo: &SqliteRepository, name: &str) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM contentattribute WHERE name = ?")
            .bind(name)
            .fetch_one(repo.pool())
            .await
            .unwrap();
    count
}

#[tokio::test]
async fn test_creates_object_in_empty_target() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source
        .store_object(&object(1).with_value("name", "Ordner"))
        .await
        .unwrap();

    let report = executor(&source, &target, options()).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.mode, Some(SyncMode::Full));
    assert_eq!(report.objects_inserted, 1);
    assert_eq!(report.schema.object_types_created, 1);
    assert!(report.message().contains("finished in "));
    assert!(report.message().ends_with(" ms."));

    let loaded = target.load_objects(&[ContentId::new(FOLDER, 1)]).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].same_header(&object(1)));
    assert_eq!(
        values(&target, 1, &text("name")).await,
        vec![Value::from("Ordner")]
    );
}

#[tokio::test]
async fn test_single_to_multivalue_conversion() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let content = text("content");
    install(&source, &folder(vec![content.clone().multivalue()])).await;
    install(&target, &folder(vec![content.clone()])).await;

    let list: Vec<Value> = vec!["rb".into(), "lh".into(), "nop".into()];
    source
        .store_object(&object(1).with_values("content", list.clone()))
        .await
        .unwrap();
    target
        .store_object(&object(1).with_value("content", "rb"))
        .await
        .unwrap();

    let mut opts = options();
    opts.allow_alter_table = true;
    let report = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(report.schema.attribute_types_modified, 1);
    assert_eq!(report.objects_updated, 1);

    let catalog = SchemaCatalog::load(&*target).await.unwrap();
    let migrated = catalog.attribute(FOLDER, "content").unwrap();
    assert!(migrated.multivalue);
    assert_eq!(values(&target, 1, migrated).await, list);
}

#[tokio::test]
async fn test_structural_change_needs_alter_table() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name"), text("test").optimized()])).await;
    install(&target, &folder(vec![text("name")])).await;
    source.store_object(&object(1)).await.unwrap();
    let before = target.load_object_types().await.unwrap();

    let err = executor(&source, &target, options()).run().await.unwrap_err();

    assert!(matches!(
        err.root_cause(),
        SyncError::SchemaChangeNotAllowed { attribute, .. } if attribute == "test"
    ));
    assert_eq!(err.exit_code(), 4);
    match &err {
        SyncError::Failed { phase, report, .. } => {
            assert_eq!(*phase, SyncPhase::SchemaSync);
            assert_eq!(report.status, RunStatus::Failed);
            assert!(report.error.is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(target.load_object_types().await.unwrap(), before);
    assert_eq!(target.count_objects().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ignore_optimized_keeps_target_plain() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("opt").optimized()])).await;
    install(&target, &folder(vec![text("opt")])).await;
    source
        .store_object(&object(1).with_value("opt", "new"))
        .await
        .unwrap();
    target
        .store_object(&object(1).with_value("opt", "old"))
        .await
        .unwrap();

    let mut opts = options();
    opts.ignore_optimized = true;
    let report = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(report.objects_updated, 1);
    assert!(report.schema_steps.is_empty());

    let catalog = SchemaCatalog::load(&*target).await.unwrap();
    assert!(!catalog.attribute(FOLDER, "opt").unwrap().optimized);
    assert!(target.quick_columns().await.unwrap().is_empty());
    assert_eq!(values(&target, 1, &text("opt")).await, vec![Value::from("new")]);
}

#[tokio::test]
async fn test_delete_pass_removes_excluded_objects() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let object_type = folder(vec![text("name")]);
    install(&source, &object_type).await;
    install(&target, &object_type).await;
    source.store_object(&object(1)).await.unwrap();
    source.store_object(&object(2).with_node(2)).await.unwrap();
    target.store_object(&object(99).with_node(3)).await.unwrap();

    let mut opts = options();
    opts.rule = Some("node_id==1 || node_id==2".into());

    // Without delete the stray object stays.
    let report = executor(&source, &target, opts.clone()).run().await.unwrap();
    assert_eq!(report.objects_inserted, 2);
    assert_eq!(report.objects_deleted, 0);
    assert_eq!(target.count_objects().await.unwrap(), 3);

    opts.delete = true;
    let report = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(report.objects_deleted, 1);
    assert!(target
        .load_objects(&[ContentId::new(FOLDER, 99)])
        .await
        .unwrap()
        .is_empty());
    assert_eq!(target.count_objects().await.unwrap(), 2);
}

#[tokio::test]
async fn test_rule_excludes_candidates() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source.store_object(&object(1)).await.unwrap();
    source.store_object(&object(2).with_node(5)).await.unwrap();

    let mut opts = options();
    opts.rule = Some("node_id == 1".into());
    let report = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(report.objects_inserted, 1);
    assert_eq!(target.count_objects().await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_source_refused_before_writes() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;

    let mut opts = options();
    opts.allow_empty = false;
    let err = executor(&source, &target, opts).run().await.unwrap_err();
    assert!(matches!(err.root_cause(), SyncError::EmptySourceNotAllowed(_)));
    assert_eq!(err.exit_code(), 3);
    match &err {
        SyncError::Failed { phase, .. } => assert_eq!(*phase, SyncPhase::Validating),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(target.load_object_types().await.unwrap().is_empty());

    // Allowed: the schema still syncs.
    let report = executor(&source, &target, options()).run().await.unwrap();
    assert_eq!(report.objects_synced(), 0);
    assert_eq!(target.load_object_types().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name"), text("tags").multivalue()])).await;
    for id in 1..=5 {
        source
            .store_object(
                &object(id)
                    .with_value("name", format!("n{}", id))
                    .with_values("tags", vec!["a".into(), "b".into()]),
            )
            .await
            .unwrap();
    }
    source.set_last_update(100).await.unwrap();

    let mut opts = options();
    opts.batch_size = 2;
    let first = executor(&source, &target, opts.clone()).run().await.unwrap();
    assert_eq!(first.objects_inserted, 5);
    assert_eq!(first.batches, 3);
    assert_eq!(target.last_update().await.unwrap(), 100);

    let second = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(second.mode, Some(SyncMode::Incremental));
    assert!(!second.has_changes());
    assert_eq!(second.values_written, 0);
}

#[tokio::test]
async fn test_full_rerun_without_watermark_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source
        .store_object(&object(1).with_value("name", "x"))
        .await
        .unwrap();

    executor(&source, &target, options()).run().await.unwrap();
    let second = executor(&source, &target, options()).run().await.unwrap();
    assert_eq!(second.mode, Some(SyncMode::Full));
    assert_eq!(second.objects_unchanged, 1);
    assert_eq!(second.objects_synced(), 0);
}

#[tokio::test]
async fn test_incremental_picks_up_changes() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let tags = text("tags").multivalue();
    install(&source, &folder(vec![tags.clone()])).await;
    source
        .store_object(&object(1).with_values("tags", vec!["a".into(), "b".into(), "c".into()]))
        .await
        .unwrap();
    source.store_object(&object(2)).await.unwrap();
    source.set_last_update(100).await.unwrap();
    executor(&source, &target, options()).run().await.unwrap();

    source
        .store_object(&object(1).with_timestamp(200).with_value("tags", "d"))
        .await
        .unwrap();
    source.set_last_update(200).await.unwrap();

    let report = executor(&source, &target, options()).run().await.unwrap();
    assert_eq!(report.mode, Some(SyncMode::Incremental));
    assert_eq!(report.objects_updated, 1);
    assert_eq!(report.objects_unchanged, 0);
    assert_eq!(values(&target, 1, &tags).await, vec![Value::from("d")]);
    assert_eq!(value_rows(&target, "tags").await, 1);
}

#[tokio::test]
async fn test_null_columns_sync_as_absent() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(
        &source,
        &folder(vec![
            text("name"),
            AttributeType::new(FOLDER, "body", AttributeKind::TextLong),
            AttributeType::new(FOLDER, "binary", AttributeKind::Blob),
            AttributeType::new(FOLDER, "link", AttributeKind::ForeignObjectLink),
        ]),
    )
    .await;
    source.store_object(&object(1)).await.unwrap();
    for name in ["name", "body", "binary", "link"] {
        sqlx::query("INSERT INTO contentattribute (contentid, name, sortorder) VALUES (?, ?, 0)")
            .bind("10002.1")
            .bind(name)
            .execute(source.pool())
            .await
            .unwrap();
    }

    let report = executor(&source, &target, options()).run().await.unwrap();
    assert_eq!(report.objects_inserted, 1);
    assert_eq!(report.attributes_written, 0);
    for name in ["name", "body", "binary", "link"] {
        assert_eq!(value_rows(&target, name).await, 0, "{}", name);
    }
}

#[tokio::test]
async fn test_dangling_links_copied_verbatim() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let link = AttributeType::new(FOLDER, "link", AttributeKind::ForeignObjectLink);
    install(&source, &folder(vec![link.clone()])).await;
    source
        .store_object(&object(1).with_values(
            "link",
            vec![Value::Link("10002.0".into())],
        ))
        .await
        .unwrap();

    executor(&source, &target, options()).run().await.unwrap();
    assert_eq!(
        values(&target, 1, &link).await,
        vec![Value::Link("10002.0".into())]
    );
}

#[tokio::test]
async fn test_streamed_lobs() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let pages = AttributeType::new(FOLDER, "pages", AttributeKind::Blob).multivalue();
    let body = AttributeType::new(FOLDER, "body", AttributeKind::TextLong);
    install(&source, &folder(vec![pages.clone(), body.clone()])).await;
    let blobs = vec![Value::Blob(vec![1; 4096]), Value::Blob(vec![2; 4096])];
    source
        .store_object(
            &object(1)
                .with_values("pages", blobs.clone())
                .with_values("body", vec![Value::LongText("x".repeat(10_000))]),
        )
        .await
        .unwrap();

    let mut opts = options();
    opts.lob_stream_threshold = Some(1);
    let report = executor(&source, &target, opts.clone()).run().await.unwrap();
    assert_eq!(report.lobs_streamed, 2);
    assert_eq!(values(&target, 1, &pages).await, blobs);
    assert_eq!(
        values(&target, 1, &body).await,
        vec![Value::LongText("x".repeat(10_000))]
    );

    let again = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(again.objects_unchanged, 1);
    assert_eq!(again.lobs_streamed, 0);
}

#[tokio::test]
async fn test_test_mode_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name").optimized()])).await;
    source
        .store_object(&object(1).with_value("name", "Ordner"))
        .await
        .unwrap();
    source.set_last_update(100).await.unwrap();

    let mut opts = options();
    opts.test = true;
    opts.delete = true;
    opts.allow_alter_table = true;
    let report = executor(&source, &target, opts).run().await.unwrap();

    assert!(report.test);
    assert!(report.message().starts_with("[test] "));
    assert_eq!(report.objects_inserted, 1);
    assert!(!report.schema_steps.is_empty());
    assert!(target.load_object_types().await.unwrap().is_empty());
    assert_eq!(target.count_objects().await.unwrap(), 0);
    assert!(target.quick_columns().await.unwrap().is_empty());
    assert_eq!(target.last_update().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_run_reports_partial_state() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source.store_object(&object(1)).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = executor(&source, &target, options())
        .with_cancellation(token)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), SyncError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    let report = err.partial_report().unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.batches, 0);
    assert!(err.format_detailed().contains("finished in"));
    assert_eq!(target.count_objects().await.unwrap(), 0);
}

#[tokio::test]
async fn test_diff_and_health_check() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source.store_object(&object(1)).await.unwrap();

    let executor = executor(&source, &target, options());
    let diff = executor.diff().await.unwrap();
    assert_eq!(diff.object_types.added.len(), 1);

    let health = executor.health_check().await.unwrap();
    assert_eq!(health.source_objects, 1);
    assert_eq!(health.target_objects, 0);
    assert_eq!(health.target_last_update, 0);
}

#[tokio::test]
async fn test_target_transaction_rolls_back_failed_batch() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name")])).await;
    source
        .store_object(&object(1).with_value("name", "x"))
        .await
        .unwrap();

    // A trigger makes every value insert on the target fail.
    install(&target, &folder(vec![text("name")])).await;
    sqlx::query(
        "CREATE TRIGGER reject_values BEFORE INSERT ON contentattribute \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(target.pool())
    .await
    .unwrap();

    let err = executor(&source, &target, options()).run().await.unwrap_err();
    assert!(matches!(err.root_cause(), SyncError::Repository(_)));
    match &err {
        SyncError::Failed { phase, .. } => assert_eq!(*phase, SyncPhase::DataSync),
        other => panic!("unexpected error: {:?}", other),
    }
    // The instance row of the failed batch was rolled back too.
    assert_eq!(target.count_objects().await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_target_forces_full_sync() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let object_type = folder(vec![text("name")]);
    install(&source, &object_type).await;
    install(&target, &object_type).await;
    source
        .store_object(&object(1).with_value("name", "Ordner"))
        .await
        .unwrap();
    // Wiped target that kept its watermark.
    source.set_last_update(100).await.unwrap();
    target.set_last_update(100).await.unwrap();

    let report = executor(&source, &target, options()).run().await.unwrap();

    assert_eq!(report.mode, Some(SyncMode::Full));
    assert_eq!(report.objects_inserted, 1);
    assert_eq!(target.count_objects().await.unwrap(), 1);
    assert_eq!(
        values(&target, 1, &text("name")).await,
        vec![Value::from("Ordner")]
    );
}

#[tokio::test]
async fn test_source_transaction_with_streams_and_deletes() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    let body = AttributeType::new(FOLDER, "body", AttributeKind::TextLong);
    let object_type = folder(vec![text("name"), body.clone()]);
    install(&source, &object_type).await;
    install(&target, &object_type).await;
    for id in 1..=5 {
        source
            .store_object(
                &object(id)
                    .with_value("name", format!("folder {}", id))
                    .with_values("body", vec![Value::LongText("x".repeat(id as usize * 1000))]),
            )
            .await
            .unwrap();
    }
    target.store_object(&object(99)).await.unwrap();

    let mut opts = options();
    opts.source_transaction = true;
    opts.use_lob_streams = true;
    opts.delete = true;
    opts.batch_size = 2;

    let report = executor(&source, &target, opts.clone()).run().await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.objects_inserted, 5);
    assert_eq!(report.objects_deleted, 1);
    assert_eq!(report.lobs_streamed, 5);
    assert_eq!(target.count_objects().await.unwrap(), 5);
    assert_eq!(
        values(&target, 3, &body).await,
        vec![Value::LongText("x".repeat(3000))]
    );

    // The source transaction was committed: the source stays writable.
    source
        .store_object(&object(6).with_value("name", "folder 6").with_timestamp(200))
        .await
        .unwrap();
    let again = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(again.objects_inserted, 1);
    assert_eq!(target.count_objects().await.unwrap(), 6);
}

#[tokio::test]
async fn test_failed_run_releases_source_transaction() {
    let dir = TempDir::new().unwrap();
    let source = repository(&dir, "source.db").await;
    let target = repository(&dir, "target.db").await;
    install(&source, &folder(vec![text("name").multivalue()])).await;
    install(&target, &folder(vec![text("name")])).await;
    source.store_object(&object(1)).await.unwrap();

    let mut opts = options();
    opts.source_transaction = true;
    let err = executor(&source, &target, opts.clone()).run().await.unwrap_err();
    assert_eq!(err.exit_code(), 4);

    source.store_object(&object(2)).await.unwrap();
    opts.allow_alter_table = true;
    let report = executor(&source, &target, opts).run().await.unwrap();
    assert_eq!(report.objects_inserted, 2);
}
