//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fixflow_agents::stages::{CommitInfo, DiffSet, Hunk};
use fixflow_gateway::{GatewayError, GenerationGateway, ImagePayload, TextStream};
use futures::StreamExt;

type Reply = dyn Fn(&str) -> Result<String, GatewayError> + Send + Sync;

/// Gateway whose answer is computed from the prompt by a closure.
pub struct FnGateway {
    reply: Box<Reply>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FnGateway {
    pub fn new(
        reply: impl Fn(&str) -> Result<String, GatewayError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn answer(&self, prompt: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)(prompt)
    }
}

#[async_trait]
impl GenerationGateway for FnGateway {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.answer(prompt)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, GatewayError> {
        let text = self.answer(prompt)?;
        Ok(futures::stream::iter(vec![Ok(text)]).boxed())
    }

    async fn complete_with_images(
        &self,
        prompt: &str,
        _images: &[ImagePayload],
    ) -> Result<String, GatewayError> {
        self.answer(prompt)
    }

    async fn complete_with_images_stream(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<TextStream, GatewayError> {
        let text = self.complete_with_images(prompt, images).await?;
        Ok(futures::stream::iter(vec![Ok(text)]).boxed())
    }
}

/// A one-hunk diff modifying `path`.
pub fn single_file_diff(path: &str) -> DiffSet {
    DiffSet {
        commit: CommitInfo {
            title: "Handle missing user".to_string(),
            message: "Return early when the user lookup fails".to_string(),
        },
        diffs: vec![Hunk {
            diff_text: "@@ -8,3 +8,3 @@\n-    user.name();\n+    user.getName();\n".to_string(),
            old_path: path.to_string(),
            new_path: path.to_string(),
            file_mode_old: "100644".to_string(),
            file_mode_new: "100644".to_string(),
            is_new: false,
            is_renamed: false,
            is_deleted: false,
            is_generated: None,
        }],
    }
}
