// 上传控制器
//
// 状态流转：
//   idle → ready → uploading → paused / complete / error
//   paused → uploading (resume) 或 idle (cancel)
//   error → 重新 set_file + start，或直接 start（合并失败时）
//
// 一次 start() 称为一次上传尝试，每次尝试有自己的取消令牌和代数（generation）。
// pause / cancel / 新的 start 会使代数增加，旧尝试之后的结果一律丢弃。
// 内部锁只保护状态快照，不会跨 await 持有，回调总在锁外调用。

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::uploader::hash::{ContentHasher, ContentIdentifier};
use crate::uploader::merge::Finalizer;
use crate::uploader::negotiator::ResumeNegotiator;
use crate::uploader::scheduler::TransferScheduler;
use crate::uploader::task::{UploadSession, UploadState};
use crate::uploader::validation::{validate_file_size, validate_file_type};
use crate::uploader::{UploadApi, UploadCallbacks, UploadChunkManager, UploadFile, UploadOptions};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 控制器内部可变状态
struct ControllerState {
    session: UploadSession,
    file: Option<UploadFile>,
    /// 上传尝试代数
    generation: u64,
    /// 当前尝试的取消令牌
    attempt_token: Option<CancellationToken>,
    /// 合并请求进行中（此时 pause 无效，只有 cancel 能中止）
    merging: bool,
}

impl ControllerState {
    /// 使当前尝试失效
    fn supersede(&mut self) {
        self.generation += 1;
        self.merging = false;
        if let Some(token) = self.attempt_token.take() {
            token.cancel();
        }
    }
}

struct ControllerInner {
    api: UploadApi,
    identifier: ContentIdentifier,
    state: Mutex<ControllerState>,
}

/// 一次上传尝试中的失败（带阶段说明，用于错误回调）
struct AttemptFailure {
    context: &'static str,
    error: UploadError,
}

impl AttemptFailure {
    fn at(context: &'static str) -> impl FnOnce(UploadError) -> AttemptFailure {
        move |error| AttemptFailure { context, error }
    }

    fn cancelled() -> Self {
        Self {
            context: "上传已取消",
            error: UploadError::Cancelled,
        }
    }

    fn message(&self) -> String {
        format!("{}: {}", self.context, self.error)
    }
}

/// 上传控制器
///
/// 一个控制器对应一个文件；克隆得到的是同一个控制器的句柄，
/// 可以在另一个任务中调用 `pause` / `cancel`
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<ControllerInner>,
}

impl UploadController {
    /// 校验配置并创建控制器
    pub fn new(config: UploadConfig, callbacks: UploadCallbacks) -> Result<Self> {
        let options = UploadOptions::new(config, callbacks)?;
        Self::from_options(Arc::new(options))
    }

    /// 使用已解析的上传选项创建控制器
    pub fn from_options(options: Arc<UploadOptions>) -> Result<Self> {
        let api = UploadApi::new(options.clone())?;
        let identifier = ContentIdentifier::new(options.hash_timeout());
        Ok(Self::from_parts(api, identifier))
    }

    /// 使用自定义哈希实现创建控制器
    pub fn with_hasher(
        options: Arc<UploadOptions>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Result<Self> {
        let api = UploadApi::new(options.clone())?;
        let identifier = ContentIdentifier::with_hasher(hasher, options.hash_timeout());
        Ok(Self::from_parts(api, identifier))
    }

    pub(crate) fn from_parts(api: UploadApi, identifier: ContentIdentifier) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                api,
                identifier,
                state: Mutex::new(ControllerState {
                    session: UploadSession::new(),
                    file: None,
                    generation: 0,
                    attempt_token: None,
                    merging: false,
                }),
            }),
        }
    }

    fn callbacks(&self) -> &UploadCallbacks {
        &self.inner.api.options().callbacks
    }

    /// 选择要上传的文件
    ///
    /// 校验文件类型和大小，通过后进入 `ready` 状态。
    /// 校验失败时状态不变，错误同时通过错误回调汇报。
    pub fn set_file(&self, file: UploadFile) -> Result<()> {
        if self.state() == UploadState::Uploading {
            return Err(UploadError::validation("file", "上传进行中，无法更换文件"));
        }

        let config = &self.inner.api.options().config;
        let checked = validate_file_type(&file, &config.allowed_types)
            .and_then(|_| validate_file_size(&file, config.max_size));
        if let Err(e) = checked {
            warn!("文件校验失败: {}", e);
            self.callbacks().error(e.to_string());
            return Err(e);
        }

        let mut state = self.inner.state.lock();
        if state.session.state == UploadState::Uploading {
            return Err(UploadError::validation("file", "上传进行中，无法更换文件"));
        }
        state.supersede();
        state.session.mark_ready(file.name(), file.size());
        info!(
            "已选择文件: name={}, size={} bytes, type={}",
            file.name(),
            file.size(),
            file.mime_type()
        );
        state.file = Some(file);
        Ok(())
    }

    /// 开始上传
    ///
    /// 未选择文件或正在上传时直接返回。被暂停/取消时返回 `Ok(())`，
    /// 其他失败会进入 `error` 状态、触发错误回调并返回错误。
    pub async fn start(&self) -> Result<()> {
        let (file, generation, token) = {
            let mut state = self.inner.state.lock();
            let Some(file) = state.file.clone() else {
                debug!("未选择文件，忽略 start");
                return Ok(());
            };
            if state.session.state == UploadState::Uploading {
                debug!("上传已在进行中，忽略 start");
                return Ok(());
            }
            state.supersede();
            let token = CancellationToken::new();
            state.attempt_token = Some(token.clone());
            state.session.mark_uploading();
            (file, state.generation, token)
        };

        info!("开始上传: name={}, size={} bytes", file.name(), file.size());

        match self.run_attempt(&file, generation, &token).await {
            Ok(()) => Ok(()),
            Err(failure) if failure.error.is_cancelled() => {
                info!("上传已中断: name={}", file.name());
                Ok(())
            }
            Err(failure) => {
                let message = failure.message();
                error!("{}", message);
                let current = self.update_if_current(generation, |session| {
                    session.mark_failed(message.clone())
                });
                if current {
                    self.callbacks().error(message);
                }
                Err(failure.error)
            }
        }
    }

    /// 执行一次上传尝试
    async fn run_attempt(
        &self,
        file: &UploadFile,
        generation: u64,
        token: &CancellationToken,
    ) -> std::result::Result<(), AttemptFailure> {
        let callbacks = self.callbacks();
        let config = &self.inner.api.options().config;

        // 1. 计算文件标识
        let file_id = self
            .inner
            .identifier
            .identify(file, |p| callbacks.hash_progress(p), token)
            .await
            .map_err(AttemptFailure::at("文件标识计算失败"))?;

        if !self.update_if_current(generation, |s| s.file_id = Some(file_id.clone())) {
            return Err(AttemptFailure::cancelled());
        }

        let scheduler = TransferScheduler::new(self.inner.api.clone());

        // 2a. 不分片：整个文件一次上传
        if !config.use_chunked_upload {
            let result = scheduler
                .upload_whole(file, &file_id, token)
                .await
                .map_err(AttemptFailure::at("文件上传失败"))?;
            if !self.update_if_current(generation, |s| s.mark_complete()) {
                return Err(AttemptFailure::cancelled());
            }
            info!("✓ 文件上传完成: name={}", file.name());
            callbacks.progress(100);
            callbacks.complete(result);
            return Ok(());
        }

        // 2b. 分片
        let mut chunk_manager = UploadChunkManager::new(file.size(), config.chunk_size);
        let total_chunks = chunk_manager.chunk_count();

        // 3. 查询服务器已有分片
        let uploaded = ResumeNegotiator::new(&self.inner.api, self.inner.api.options().check_timeout())
            .check_uploaded(
                &file_id,
                total_chunks,
                |message| {
                    if self.is_current(generation) {
                        callbacks.error(message);
                    }
                },
                token,
            )
            .await;
        if token.is_cancelled() {
            return Err(AttemptFailure::cancelled());
        }

        chunk_manager.seed_uploaded(uploaded.iter());
        let mut completed = chunk_manager.uploaded_count();
        let progress = chunk_manager.progress();
        if !self.update_if_current(generation, |s| s.set_chunks(total_chunks, completed, progress)) {
            return Err(AttemptFailure::cancelled());
        }
        callbacks.progress(progress);

        // 所有分片都已存在
        if chunk_manager.is_completed() {
            if !self.update_if_current(generation, |s| s.mark_complete()) {
                return Err(AttemptFailure::cancelled());
            }
            info!("✓ 所有分片已存在，无需上传: fileId={}", file_id);
            callbacks.complete(json!({
                "fileId": file_id,
                "fileName": file.name(),
            }));
            return Ok(());
        }

        // 4. 上传剩余分片
        scheduler
            .upload_all(
                file,
                &file_id,
                &mut chunk_manager,
                |_index, progress| {
                    completed += 1;
                    if self.update_if_current(generation, |s| {
                        s.set_chunks(total_chunks, completed, progress)
                    }) {
                        callbacks.progress(progress);
                    }
                },
                token,
            )
            .await
            .map_err(AttemptFailure::at("上传失败"))?;

        if token.is_cancelled() || !chunk_manager.is_completed() {
            return Err(AttemptFailure::cancelled());
        }

        // 5. 合并
        if !self.begin_merge(generation) {
            return Err(AttemptFailure::cancelled());
        }
        let merged = Finalizer::new(&self.inner.api)
            .merge(&file_id, file.name(), total_chunks, token)
            .await;
        self.end_merge(generation);
        let result = merged.map_err(AttemptFailure::at("合并文件失败"))?;

        if !self.update_if_current(generation, |s| s.mark_complete()) {
            return Err(AttemptFailure::cancelled());
        }
        info!(
            "✓ 上传完成: name={}, fileId={}, totalChunks={}",
            file.name(),
            file_id,
            total_chunks
        );
        callbacks.complete(result);
        Ok(())
    }

    /// 暂停上传
    ///
    /// 只在 `uploading` 状态有效，取消所有在途分片请求。
    /// 合并请求已发出时不再响应，等待合并结果
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if state.session.state != UploadState::Uploading {
            debug!("当前状态 {:?}，忽略 pause", state.session.state);
            return;
        }
        if state.merging {
            debug!("正在合并分片，忽略 pause");
            return;
        }
        state.supersede();
        state.session.mark_paused();
        info!("上传已暂停: progress={}%", state.session.progress);
    }

    /// 继续上传
    ///
    /// 只在 `paused` 状态有效，重新执行 start（已上传的分片由服务器报告后跳过）
    pub async fn resume(&self) -> Result<()> {
        if self.state() != UploadState::Paused {
            debug!("当前状态 {:?}，忽略 resume", self.state());
            return Ok(());
        }
        info!("继续上传");
        self.start().await
    }

    /// 取消上传
    ///
    /// 停止在途请求，清空文件、文件标识、分片信息和进度，回到 `idle`
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.supersede();
        state.file = None;
        state.session.reset();
        info!("上传已取消");
    }

    /// 当前状态
    pub fn state(&self) -> UploadState {
        self.inner.state.lock().session.state
    }

    /// 当前进度 (0-100)
    pub fn progress(&self) -> u8 {
        self.inner.state.lock().session.progress
    }

    /// 会话快照
    pub fn session(&self) -> UploadSession {
        self.inner.state.lock().session.clone()
    }

    pub fn options(&self) -> &UploadOptions {
        self.inner.api.options()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.state.lock().generation == generation
    }

    /// 进入合并阶段，尝试已失效时返回 false
    fn begin_merge(&self, generation: u64) -> bool {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }
        state.merging = true;
        true
    }

    fn end_merge(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.generation == generation {
            state.merging = false;
        }
    }

    /// 只有当前尝试才能修改会话，返回是否修改成功
    fn update_if_current<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut UploadSession),
    {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return false;
        }
        f(&mut state.session);
        true
    }
}
