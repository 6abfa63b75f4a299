// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-stage dispatch to the configured backend.

use std::collections::HashMap;

use tracing::debug;

use bildwerk_core::config::{PipelineConfig, StageBackend};
use bildwerk_core::error::{BildwerkError, Result};
use bildwerk_core::types::StageKind;
use bildwerk_pipeline::CommandExecutor;
use bildwerk_pipeline::stage::{StageExecutor, StageRequest, StageResponse};
use bildwerk_transform::{LocalBucket, LocalTransform};

/// One configured stage implementation.
#[derive(Debug, Clone)]
pub enum Backend {
    Command(CommandExecutor),
    Local(LocalTransform),
}

/// Routes each stage to its configured backend.
#[derive(Debug, Clone)]
pub struct StageRouter {
    routes: HashMap<StageKind, Backend>,
}

impl StageRouter {
    pub fn from_config(config: &PipelineConfig, bucket: LocalBucket) -> Result<Self> {
        let local = LocalTransform::new(bucket, config);
        let mut routes = HashMap::new();

        for stage in StageKind::ALL {
            let backend = match config.stages.backend(stage) {
                StageBackend::Command { program, args } => {
                    Backend::Command(CommandExecutor::new(program.clone(), args.clone()))
                }
                StageBackend::Local => match stage {
                    StageKind::Resize | StageKind::Crop | StageKind::Censor => {
                        Backend::Local(local.clone())
                    }
                    StageKind::Moderate | StageKind::DetectFaces => {
                        return Err(BildwerkError::Config(format!(
                            "{stage} has no local implementation"
                        )));
                    }
                },
            };
            debug!(%stage, ?backend, "stage routed");
            routes.insert(stage, backend);
        }

        Ok(Self { routes })
    }
}

impl StageExecutor for StageRouter {
    async fn execute(&self, request: &StageRequest) -> StageResponse {
        match self.routes.get(&request.stage) {
            Some(Backend::Command(command)) => command.execute(request).await,
            Some(Backend::Local(local)) => local.execute(request).await,
            None => StageResponse::fatal(format!("no backend for {}", request.stage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use bildwerk_core::types::ErrorClass;
    use bildwerk_pipeline::ExecutionContext;

    use super::*;

    fn request(stage: StageKind) -> StageRequest {
        StageRequest {
            stage,
            image_key: "cat.png".into(),
            bucket: "uploads".into(),
            context: ExecutionContext::default(),
            parameters: Map::new(),
        }
    }

    #[test]
    fn default_config_routes_every_stage() {
        let router =
            StageRouter::from_config(&PipelineConfig::default(), LocalBucket::new("/tmp")).expect("router");
        assert!(matches!(router.routes.get(&StageKind::Resize), Some(Backend::Local(_))));
        assert!(matches!(router.routes.get(&StageKind::Moderate), Some(Backend::Command(_))));
        assert!(matches!(router.routes.get(&StageKind::DetectFaces), Some(Backend::Command(_))));
        assert!(matches!(router.routes.get(&StageKind::Censor), Some(Backend::Local(_))));
    }

    #[test]
    fn local_face_detection_is_refused() {
        let mut config = PipelineConfig::default();
        config.stages.detect_faces = StageBackend::Local;
        let err = StageRouter::from_config(&config, LocalBucket::new("/tmp")).unwrap_err();
        assert!(matches!(err, BildwerkError::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_stage_is_dispatched() {
        let mut config = PipelineConfig::default();
        config.stages.moderate = StageBackend::Command {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                r#"cat > /dev/null; echo '{"ok": true, "output": {"labelCount": 0}}'"#.into(),
            ],
        };
        let router = StageRouter::from_config(&config, LocalBucket::new("/tmp")).expect("router");

        let response = router.execute(&request(StageKind::Moderate)).await;

        assert!(response.ok, "{response:?}");
        assert_eq!(response.output["labelCount"], 0);
    }

    #[tokio::test]
    async fn local_stage_is_dispatched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let router =
            StageRouter::from_config(&PipelineConfig::default(), LocalBucket::new(dir.path()))
                .expect("router");

        // Nothing uploaded, so the local resize reports a missing object.
        let response = router.execute(&request(StageKind::Resize)).await;

        assert!(!response.ok);
        assert_eq!(response.error_kind, Some(ErrorClass::Fatal));
    }
}
