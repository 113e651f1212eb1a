//! Rendering capability trait and shared types.
//!
//! The [`Renderer`] trait is the single seam between the pipeline and
//! whatever produces pixels. Backends are interchangeable: the
//! [`PlaceholderRenderer`](super::placeholder::PlaceholderRenderer) draws
//! locally, the [`CommandRenderer`](super::command::CommandRenderer) shells
//! out to an external generator, and [`FallbackRenderer`] chains two of
//! them.

use crate::types::Keyword;
use std::time::Duration;
use thiserror::Error;

/// Per-call generation failure. Never fatal to a run: the coordinator
/// records it against the keyword and moves on.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("renderer failed: {0}")]
    Failed(String),
    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Everything a backend needs to render one keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub keyword: Keyword,
    pub category: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

/// Capability: render an image for a prompt.
///
/// Implementations return encoded image bytes (JPEG or PNG). Must be
/// `Sync` so the coordinator can share one instance across rayon workers.
pub trait Renderer: Send + Sync {
    /// Short backend name for logs and bundle manifests.
    fn name(&self) -> &str;

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, GenerationError>;

    /// Render and name the backend that produced the bytes. Chains
    /// override this; a single backend answers with its own name.
    fn render_with_backend(
        &self,
        request: &RenderRequest,
    ) -> Result<(Vec<u8>, &str), GenerationError> {
        self.render(request).map(|bytes| (bytes, self.name()))
    }
}

/// Try `primary`, fall back to `fallback` when it fails.
pub struct FallbackRenderer {
    primary: Box<dyn Renderer>,
    fallback: Box<dyn Renderer>,
}

impl FallbackRenderer {
    pub fn new(primary: Box<dyn Renderer>, fallback: Box<dyn Renderer>) -> Self {
        Self { primary, fallback }
    }
}

impl Renderer for FallbackRenderer {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, GenerationError> {
        self.render_with_backend(request).map(|(bytes, _)| bytes)
    }

    fn render_with_backend(
        &self,
        request: &RenderRequest,
    ) -> Result<(Vec<u8>, &str), GenerationError> {
        match self.primary.render_with_backend(request) {
            Ok(rendered) => Ok(rendered),
            Err(e) => {
                tracing::warn!(
                    keyword = %request.keyword,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "primary renderer failed, using fallback"
                );
                self.fallback.render_with_backend(request)
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock renderer that records requests and answers from a script.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    ///
    /// Keywords listed in `failures` fail with that reason; every other
    /// keyword gets `bytes`.
    pub struct MockRenderer {
        pub name: &'static str,
        pub bytes: Vec<u8>,
        pub failures: HashMap<String, String>,
        pub requests: Mutex<Vec<RenderRequest>>,
    }

    impl MockRenderer {
        pub fn returning(bytes: Vec<u8>) -> Self {
            Self {
                name: "mock",
                bytes,
                failures: HashMap::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn named(mut self, name: &'static str) -> Self {
            self.name = name;
            self
        }

        pub fn failing_on(mut self, keyword: &str, reason: &str) -> Self {
            self.failures.insert(keyword.to_string(), reason.to_string());
            self
        }

        pub fn requested_keywords(&self) -> Vec<String> {
            let mut keywords: Vec<String> = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.keyword.to_string())
                .collect();
            keywords.sort();
            keywords
        }
    }

    impl Renderer for MockRenderer {
        fn name(&self) -> &str {
            self.name
        }

        fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.failures.get(request.keyword.as_str()) {
                Some(reason) => Err(GenerationError::Failed(reason.clone())),
                None => Ok(self.bytes.clone()),
            }
        }
    }

    fn request(keyword: &str) -> RenderRequest {
        RenderRequest {
            keyword: Keyword::parse(keyword).unwrap(),
            category: "nature".into(),
            prompt: format!("photo of {keyword}"),
            width: 10,
            height: 10,
        }
    }

    #[test]
    fn mock_records_requests() {
        let renderer = MockRenderer::returning(vec![1, 2, 3]);
        assert_eq!(renderer.render(&request("forest")).unwrap(), vec![1, 2, 3]);
        assert_eq!(renderer.requested_keywords(), vec!["forest"]);
    }

    #[test]
    fn mock_scripted_failure() {
        let renderer = MockRenderer::returning(vec![1]).failing_on("storm", "quota exceeded");
        let err = renderer.render(&request("storm")).unwrap_err();
        assert_eq!(err.to_string(), "renderer failed: quota exceeded");
    }

    #[test]
    fn fallback_used_only_on_primary_failure() {
        let fallback = FallbackRenderer::new(
            Box::new(MockRenderer::returning(vec![1]).failing_on("storm", "boom")),
            Box::new(MockRenderer::returning(vec![2])),
        );
        assert_eq!(fallback.render(&request("forest")).unwrap(), vec![1]);
        assert_eq!(fallback.render(&request("storm")).unwrap(), vec![2]);
        assert_eq!(fallback.name(), "mock");
    }

    #[test]
    fn fallback_names_the_backend_that_rendered() {
        let fallback = FallbackRenderer::new(
            Box::new(
                MockRenderer::returning(vec![1])
                    .named("imagen-cli")
                    .failing_on("storm", "boom"),
            ),
            Box::new(MockRenderer::returning(vec![2]).named("placeholder")),
        );
        let (_, backend) = fallback.render_with_backend(&request("forest")).unwrap();
        assert_eq!(backend, "imagen-cli");
        let (bytes, backend) = fallback.render_with_backend(&request("storm")).unwrap();
        assert_eq!(bytes, vec![2]);
        assert_eq!(backend, "placeholder");
    }
}
