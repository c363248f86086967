//! API-format ComfyUI workflow, patched per render request.

use std::path::Path;

use anyhow::{Context, anyhow};
use serde_json::{Map, Value, json};
use sr_core::collab::RenderRequest;

/// Ids of the graph nodes the render request writes into.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowNodes {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub sampler: String,
    pub video_settings: String,
    pub frame_rate: String,
    pub image_loader: String,
}

impl Default for WorkflowNodes {
    fn default() -> Self {
        Self {
            positive_prompt: "6".into(),
            negative_prompt: "7".into(),
            sampler: "3".into(),
            video_settings: "50".into(),
            frame_rate: "54".into(),
            image_loader: "52".into(),
        }
    }
}

impl WorkflowNodes {
    fn all(&self) -> [&str; 6] {
        [
            &self.positive_prompt,
            &self.negative_prompt,
            &self.sampler,
            &self.video_settings,
            &self.frame_rate,
            &self.image_loader,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    graph: Value,
    nodes: WorkflowNodes,
}

impl WorkflowTemplate {
    pub async fn load(path: &Path, nodes: WorkflowNodes) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read workflow {}", path.display()))?;
        let graph = serde_json::from_str(&raw)
            .with_context(|| format!("workflow {} is not valid JSON", path.display()))?;
        Self::new(graph, nodes)
    }

    /// Fails when a configured node is missing from the graph.
    pub fn new(graph: Value, nodes: WorkflowNodes) -> anyhow::Result<Self> {
        for node in nodes.all() {
            graph
                .get(node)
                .and_then(|n| n.get("inputs"))
                .and_then(Value::as_object)
                .ok_or_else(|| anyhow!("workflow has no node {node} with inputs"))?;
        }
        Ok(Self { graph, nodes })
    }

    /// A copy of the graph carrying this request's prompts, clip settings,
    /// seed and uploaded image name.
    pub fn render(&self, request: &RenderRequest, image_name: &str) -> anyhow::Result<Value> {
        let mut graph = self.graph.clone();
        let params = &request.params;
        let nodes = &self.nodes;

        inputs_mut(&mut graph, &nodes.positive_prompt)?
            .insert("text".into(), json!(request.scene.prompt));
        inputs_mut(&mut graph, &nodes.negative_prompt)?
            .insert("text".into(), json!(request.scene.negative_prompt));

        let video = inputs_mut(&mut graph, &nodes.video_settings)?;
        video.insert("width".into(), json!(params.width));
        video.insert("height".into(), json!(params.height));
        video.insert("length".into(), json!(params.length));

        let sampler = inputs_mut(&mut graph, &nodes.sampler)?;
        sampler.insert("seed".into(), json!(request.seed));
        sampler.insert("steps".into(), json!(params.steps));
        sampler.insert("cfg".into(), json!(params.cfg));
        sampler.insert("sampler_name".into(), json!(params.sampler_name));
        sampler.insert("scheduler".into(), json!(params.scheduler));

        inputs_mut(&mut graph, &nodes.frame_rate)?
            .insert("frame_rate".into(), json!(params.frame_rate));
        inputs_mut(&mut graph, &nodes.image_loader)?.insert("image".into(), json!(image_name));

        Ok(graph)
    }
}

fn inputs_mut<'a>(graph: &'a mut Value, node: &str) -> anyhow::Result<&'a mut Map<String, Value>> {
    graph
        .get_mut(node)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow!("workflow has no node {node} with inputs"))
}

#[cfg(test)]
mod tests {
    use sr_core::{ClipParams, JobId, Media, ScenePrompt};

    use super::*;

    fn graph() -> Value {
        json!({
            "3": { "class_type": "KSampler", "inputs": { "seed": 0, "steps": 1, "cfg": 1.0, "model": ["1", 0] } },
            "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
            "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
            "50": { "class_type": "WanImageToVideo", "inputs": { "width": 512, "height": 512, "length": 33 } },
            "52": { "class_type": "LoadImage", "inputs": { "image": "example.png" } },
            "54": { "class_type": "VHS_VideoCombine", "inputs": { "frame_rate": 16 } }
        })
    }

    fn request() -> RenderRequest {
        RenderRequest {
            job_id: JobId::new(),
            scene: ScenePrompt {
                index: 0,
                prompt: "a lantern-lit harbour".into(),
                negative_prompt: "blurry".into(),
            },
            image: Media::new(vec![0u8; 4], "png"),
            params: ClipParams::default(),
            seed: 1234,
        }
    }

    #[test]
    fn test_render_patches_nodes() {
        let template = WorkflowTemplate::new(graph(), WorkflowNodes::default()).unwrap();
        let patched = template.render(&request(), "scene_0.png").unwrap();

        assert_eq!(patched["6"]["inputs"]["text"], "a lantern-lit harbour");
        assert_eq!(patched["7"]["inputs"]["text"], "blurry");
        assert_eq!(patched["3"]["inputs"]["seed"], 1234);
        assert_eq!(patched["3"]["inputs"]["sampler_name"], "uni_pc");
        assert_eq!(patched["3"]["inputs"]["model"], json!(["1", 0]));
        assert_eq!(patched["50"]["inputs"]["width"], 848);
        assert_eq!(patched["50"]["inputs"]["length"], 81);
        assert_eq!(patched["54"]["inputs"]["frame_rate"], 8);
        assert_eq!(patched["52"]["inputs"]["image"], "scene_0.png");

        // template itself is untouched
        assert_eq!(template.graph["52"]["inputs"]["image"], "example.png");
    }

    #[test]
    fn test_missing_node_rejected() {
        let nodes = WorkflowNodes {
            image_loader: "99".into(),
            ..Default::default()
        };
        let err = WorkflowTemplate::new(graph(), nodes).unwrap_err();
        assert!(err.to_string().contains("99"));
    }
}
