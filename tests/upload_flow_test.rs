// 上传流程集成测试（wiremock 模拟上传服务器）

use parking_lot::Mutex;
use resumable_uploader::uploader::UploadFile;
use resumable_uploader::{UploadCallbacks, UploadConfig, UploadController, UploadError, UploadState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MB: usize = 1024 * 1024;

/// 记录所有回调
#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<u8>>,
    errors: Mutex<Vec<String>>,
    completed: Mutex<Vec<Value>>,
}

impl Recorder {
    fn callbacks(self: &Arc<Self>) -> UploadCallbacks {
        let progress = self.clone();
        let errors = self.clone();
        let completed = self.clone();
        UploadCallbacks::default()
            .on_progress(move |p| progress.progress.lock().push(p))
            .on_error(move |m| errors.errors.lock().push(m))
            .on_complete(move |v| completed.completed.lock().push(v))
    }
}

fn test_config(server: &MockServer, chunk_size: u64, concurrency: usize) -> UploadConfig {
    let mut config = UploadConfig::with_base_url(server.uri());
    config.chunk_size = chunk_size;
    config.concurrency = concurrency;
    config.chunk_retry_backoff_ms = 1;
    config
}

fn file_id_of(file: &UploadFile) -> String {
    format!(
        "{:x}-{}-{}",
        md5::compute(file.bytes()),
        file.name(),
        file.size()
    )
}

async fn mount_check(server: &MockServer, indexes: Value) {
    Mock::given(method("GET"))
        .and(path("/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadedIndexes": indexes
        })))
        .mount(server)
        .await;
}

async fn wait_for_state(controller: &UploadController, state: UploadState) {
    for _ in 0..500 {
        if controller.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("等待状态 {:?} 超时，当前 {:?}", state, controller.state());
}

#[tokio::test]
async fn test_resume_uploads_only_missing_chunks_then_merges() {
    let mock_server = MockServer::start().await;
    let file = UploadFile::new("big.bin", "application/octet-stream", vec![b'a'; 5 * MB]);
    let file_id = file_id_of(&file);

    Mock::given(method("GET"))
        .and(path("/check"))
        .and(query_param("fileId", file_id.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadedIndexes": [0]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("filename=\"big.bin.part0\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"totalChunks\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .and(body_json(json!({
            "fileId": file_id.clone(),
            "fileName": "big.bin",
            "totalChunks": 3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "/files/big.bin" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller = UploadController::new(
        test_config(&mock_server, 2 * MB as u64, 2),
        recorder.callbacks(),
    )
    .unwrap();
    controller.set_file(file).unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(controller.progress(), 100);

    let progress = recorder.progress.lock().clone();
    assert_eq!(progress.first(), Some(&40));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    let session = controller.session();
    assert_eq!(session.total_chunks, 3);
    assert_eq!(session.completed_chunks, 3);
    assert_eq!(session.file_id.as_deref(), Some(file_id.as_str()));

    assert_eq!(
        recorder.completed.lock().as_slice(),
        &[json!({ "url": "/files/big.bin" })]
    );
    assert!(recorder.errors.lock().is_empty());
}

#[tokio::test]
async fn test_all_chunks_present_completes_without_uploading() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([0, 1, 2])).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let file = UploadFile::new("a.bin", "application/octet-stream", vec![7u8; 10]);
    let file_id = file_id_of(&file);
    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 3), recorder.callbacks()).unwrap();
    controller.set_file(file).unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(*recorder.progress.lock(), vec![100]);
    assert_eq!(
        recorder.completed.lock().as_slice(),
        &[json!({ "fileId": file_id, "fileName": "a.bin" })]
    );
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 1024, 3), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(
        recorder.completed.lock().as_slice(),
        &[json!({ "data": "ok" })]
    );
    assert!(recorder.errors.lock().is_empty());
}

#[tokio::test]
async fn test_client_error_moves_to_error_state() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 1024, 3), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.txt", "text/plain", b"hello".to_vec()))
        .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, UploadError::ChunkFailed { index: 0, .. }));
    assert_eq!(controller.state(), UploadState::Error);

    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("上传失败: 分片 0 上传失败"));
    assert!(errors[0].contains("404"));
}

#[tokio::test]
async fn test_check_failure_falls_back_to_full_upload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/check"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.bin", "application/octet-stream", vec![1u8; 10]))
        .unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("检查已上传分片失败"));
}

#[tokio::test]
async fn test_whole_file_upload_when_chunking_disabled() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\"; filename=\"a.txt\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42 })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&mock_server, 4, 2);
    config.use_chunked_upload = false;
    let recorder = Arc::new(Recorder::default());
    let controller = UploadController::new(config, recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.txt", "text/plain", b"hello world".to_vec()))
        .unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(*recorder.progress.lock(), vec![100]);
    assert_eq!(recorder.completed.lock().as_slice(), &[json!({ "id": 42 })]);
}

#[tokio::test]
async fn test_merge_failure_then_start_again() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uploadedIndexes": [] })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_check(&mock_server, json!([0, 1])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.bin", "application/octet-stream", vec![1u8; 8]))
        .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, UploadError::Http { status: 500, .. }));
    assert_eq!(controller.state(), UploadState::Error);
    assert!(recorder.errors.lock()[0].starts_with("合并文件失败"));

    // 服务器已有全部分片，第二次直接完成
    controller.start().await.unwrap();
    assert_eq!(controller.state(), UploadState::Complete);
    assert!(controller.session().error.is_none());
}

#[tokio::test]
async fn test_pause_then_resume() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.bin", "application/octet-stream", vec![1u8; 8]))
        .unwrap();

    let runner = controller.clone();
    let attempt = tokio::spawn(async move { runner.start().await });
    wait_for_state(&controller, UploadState::Uploading).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    controller.pause();
    assert_eq!(controller.state(), UploadState::Paused);
    attempt.await.unwrap().unwrap();
    assert_eq!(controller.state(), UploadState::Paused);

    controller.resume().await.unwrap();
    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(recorder.completed.lock().len(), 1);
    assert!(recorder.errors.lock().is_empty());
}

#[tokio::test]
async fn test_pause_is_ignored_while_merging() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merge"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": "/files/a.bin" }))
                .set_delay(Duration::from_millis(800)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.bin", "application/octet-stream", vec![1u8; 8]))
        .unwrap();

    let runner = controller.clone();
    let attempt = tokio::spawn(async move { runner.start().await });

    // 等待合并请求到达服务器
    let mut merge_sent = false;
    for _ in 0..500 {
        let requests = mock_server.received_requests().await.unwrap_or_default();
        if requests.iter().any(|r| r.url.path() == "/merge") {
            merge_sent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(merge_sent, "合并请求未发出");

    controller.pause();
    assert_eq!(controller.state(), UploadState::Uploading);

    attempt.await.unwrap().unwrap();
    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(
        recorder.completed.lock().as_slice(),
        &[json!({ "url": "/files/a.bin" })]
    );
    assert!(recorder.errors.lock().is_empty());

    // 完成后 pause 仍然无效
    controller.pause();
    assert_eq!(controller.state(), UploadState::Complete);
}

#[tokio::test]
async fn test_zero_byte_file_completes_without_requests() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let file = UploadFile::new("empty", "application/octet-stream", Vec::new());
    let file_id = file_id_of(&file);
    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller.set_file(file).unwrap();
    controller.start().await.unwrap();

    assert_eq!(controller.state(), UploadState::Complete);
    assert_eq!(controller.progress(), 100);
    assert_eq!(controller.session().total_chunks, 0);
    assert_eq!(*recorder.progress.lock(), vec![100]);
    assert_eq!(
        recorder.completed.lock().as_slice(),
        &[json!({ "fileId": file_id, "fileName": "empty" })]
    );
    assert!(recorder.errors.lock().is_empty());
}

#[tokio::test]
async fn test_cancel_during_upload_resets_to_idle() {
    let mock_server = MockServer::start().await;
    mount_check(&mock_server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller =
        UploadController::new(test_config(&mock_server, 4, 2), recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("a.bin", "application/octet-stream", vec![1u8; 12]))
        .unwrap();

    let runner = controller.clone();
    let attempt = tokio::spawn(async move { runner.start().await });
    wait_for_state(&controller, UploadState::Uploading).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    controller.cancel();
    attempt.await.unwrap().unwrap();

    let session = controller.session();
    assert_eq!(session.state, UploadState::Idle);
    assert_eq!(session.progress, 0);
    assert_eq!(session.total_chunks, 0);
    assert!(session.file_name.is_none());
    assert!(session.file_id.is_none());
    assert!(recorder.completed.lock().is_empty());
    assert!(recorder.errors.lock().is_empty());

    // 文件已清空，start 不会再发请求
    controller.start().await.unwrap();
    assert_eq!(controller.state(), UploadState::Idle);
}

#[tokio::test]
async fn test_rejected_file_leaves_state_unchanged() {
    let mock_server = MockServer::start().await;
    let mut config = test_config(&mock_server, 4, 2);
    config.allowed_types = vec!["jpg".to_string()];

    let recorder = Arc::new(Recorder::default());
    let controller = UploadController::new(config, recorder.callbacks()).unwrap();
    controller
        .set_file(UploadFile::new("photo.JPG", "image/jpeg", vec![1u8; 4]))
        .unwrap();

    let err = controller
        .set_file(UploadFile::new("notes.txt", "text/plain", vec![1u8; 4]))
        .unwrap_err();
    assert!(matches!(err, UploadError::FileType { .. }));
    assert_eq!(controller.state(), UploadState::Ready);
    assert_eq!(controller.session().file_name.as_deref(), Some("photo.JPG"));
    assert_eq!(recorder.errors.lock().len(), 1);
}
