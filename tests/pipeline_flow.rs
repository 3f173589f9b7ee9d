use httpmock::{
    Method::{GET, POST, PUT},
    MockServer,
};
use product_ingest::{
    backup::JsonlBackupStore,
    config::Config,
    pipeline::{Collaborators, IngestionPipeline, PipelineError, RawRecord},
    qdrant::point_id_for,
};
use serde_json::json;
use std::{collections::HashMap, io::Cursor, path::PathBuf};

const LABELS: &str = r#"{"image_recipient":["Mom"],"target_audience":["Kids"],"occasion":["Mother's Day"],"product_type":["T-shirt"],"design_style":["Cartoon"],"color_aesthetic":["Pastel"],"trademark_level":"No TM","main_subject":["Flowers"],"text":["Best Mom Ever"]}"#;

fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(32, 24, image::Rgb([200, 40, 40]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

fn config_for(qdrant: &MockServer, ollama: &MockServer, backup: &PathBuf) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        ("QDRANT_URL", qdrant.base_url()),
        ("QDRANT_COLLECTION_NAME", "products".to_string()),
        ("EMBEDDING_PROVIDER", "hashing".to_string()),
        ("EMBEDDING_DIMENSION", "16".to_string()),
        ("OLLAMA_URL", ollama.base_url()),
        ("LABELER_MODEL", "vision-test".to_string()),
        ("MAX_WORKERS", "4".to_string()),
        ("INSERT_BATCH_SIZE", "5".to_string()),
        ("BACKUP_PATH", backup.display().to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).expect("valid config")
}

fn records(images: &MockServer, count: usize) -> Vec<RawRecord> {
    (0..count)
        .map(|i| RawRecord {
            id: format!("p-{i}"),
            image: images.url(format!("/img/p-{i}.png")),
            date: format!("2024-05-{:02} 08:00:00", i + 1),
            platform: "Website".into(),
            store_name: "Acme".into(),
            likes: i as u64,
            comments: 0,
            shares: 0,
            link: format!("https://shop.example.com/p-{i}"),
        })
        .collect()
}

#[tokio::test]
async fn end_to_end_run_skips_existing_and_batches_inserts() {
    let qdrant = MockServer::start_async().await;
    let ollama = MockServer::start_async().await;
    let images = MockServer::start_async().await;
    let backup_path =
        std::env::temp_dir().join(format!("pipeline-flow-{}.jsonl", uuid::Uuid::new_v4()));

    let collection = qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/products");
            then.status(200)
                .json_body(json!({ "result": {}, "status": "ok" }));
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/products/index");
            then.status(200)
                .json_body(json!({ "result": {}, "status": "ok" }));
        })
        .await;
    let lookup = qdrant
        .mock_async(|when, then| {
            when.method(POST).path("/collections/products/points");
            then.status(200).json_body(json!({
                "result": [
                    { "id": point_id_for("p-2"), "payload": { "product_id": "p-2" } },
                    { "id": point_id_for("p-7"), "payload": { "product_id": "p-7" } },
                ],
                "status": "ok",
            }));
        })
        .await;
    let upserts = qdrant
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/collections/products/points")
                .query_param("wait", "true");
            then.status(200)
                .json_body(json!({ "result": { "status": "completed" }, "status": "ok" }));
        })
        .await;
    let labeler = ollama
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("\"model\":\"vision-test\"");
            then.status(200)
                .json_body(json!({ "response": LABELS, "done": true }));
        })
        .await;
    let downloads = images
        .mock_async(|when, then| {
            when.method(GET).path_contains("/img/");
            then.status(200)
                .header("content-type", "image/png")
                .body(png_bytes());
        })
        .await;

    let config = config_for(&qdrant, &ollama, &backup_path);
    let collaborators = Collaborators::from_config(&config)
        .await
        .expect("startup succeeds");
    let pipeline = IngestionPipeline::new(collaborators, config.pipeline_settings());

    let stats = pipeline.run(records(&images, 10)).await;

    collection.assert_async().await;
    lookup.assert_hits_async(1).await;
    assert_eq!(stats.crawled, 10);
    assert_eq!(stats.duplicates, 2);
    assert_eq!(stats.processed, 8);
    assert_eq!(stats.inserted, 8);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.batches, 2);
    upserts.assert_hits_async(2).await;
    labeler.assert_hits_async(8).await;
    downloads.assert_hits_async(8).await;
    for skipped in ["p-2", "p-7"] {
        assert!(!stats.inserted_ids.iter().any(|id| id == skipped));
    }

    let summaries = JsonlBackupStore::new(&backup_path)
        .load_latest()
        .await
        .expect("backup readable");
    assert_eq!(summaries.len(), 8);
    assert!(summaries["p-0"].description.contains("T-shirt"));
    std::fs::remove_file(&backup_path).ok();
}

#[tokio::test]
async fn broken_image_fails_only_its_record() {
    let qdrant = MockServer::start_async().await;
    let ollama = MockServer::start_async().await;
    let images = MockServer::start_async().await;
    let backup_path =
        std::env::temp_dir().join(format!("pipeline-flow-{}.jsonl", uuid::Uuid::new_v4()));

    qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/products");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/products/index");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(POST).path("/collections/products/points");
            then.status(200).json_body(json!({ "result": [] }));
        })
        .await;
    qdrant
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/products/points");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;
    ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200)
                .json_body(json!({ "response": LABELS, "done": true }));
        })
        .await;
    images
        .mock_async(|when, then| {
            when.method(GET).path("/broken/p-3.png");
            then.status(404);
        })
        .await;
    images
        .mock_async(|when, then| {
            when.method(GET).path_contains("/img/");
            then.status(200).body(png_bytes());
        })
        .await;

    let config = config_for(&qdrant, &ollama, &backup_path);
    let collaborators = Collaborators::from_config(&config)
        .await
        .expect("startup succeeds");
    let pipeline = IngestionPipeline::new(collaborators, config.pipeline_settings());

    let mut batch = records(&images, 10);
    batch[3].image = images.url("/broken/p-3.png");
    let stats = pipeline.run(batch).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failed_ids, vec!["p-3"]);
    assert_eq!(stats.processed, 9);
    assert_eq!(stats.inserted, 9);
    std::fs::remove_file(&backup_path).ok();
}

#[tokio::test]
async fn unreachable_store_aborts_before_processing() {
    let qdrant = MockServer::start_async().await;
    let ollama = MockServer::start_async().await;
    let backup_path = std::env::temp_dir().join("pipeline-flow-unused.jsonl");

    qdrant
        .mock_async(|when, then| {
            when.method(GET).path("/collections/products");
            then.status(500).body("boom");
        })
        .await;

    let config = config_for(&qdrant, &ollama, &backup_path);
    let result = Collaborators::from_config(&config).await;

    assert!(matches!(result, Err(PipelineError::Startup(_))));
}
