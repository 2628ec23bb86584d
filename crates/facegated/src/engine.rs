use facegate_core::{decode_image, Embedding, ExtractError, FaceEncoder};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        upload: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, ExtractError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image, detect its single face and return the embedding.
    pub async fn encode(&self, upload: Vec<u8>) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                upload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder owns the ONNX sessions. Decoding and inference are blocking
/// and run one request at a time off the async runtime.
pub fn spawn_engine(mut encoder: Box<dyn FaceEncoder>) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { upload, reply } => {
                        let started = std::time::Instant::now();
                        let result = decode_image(&upload).and_then(|image| encoder.encode(&image));
                        tracing::debug!(
                            bytes = upload.len(),
                            ok = result.is_ok(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "encode finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
