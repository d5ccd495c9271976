//! Message shapes exchanged with the embedded UI.
//!
//! Messages are JSON objects tagged by `type`, one per line on the `serve`
//! transport. Rasters travel as base64 text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scene::NodeId;

/// Editor context announced in the opening handshake.
pub const EDITOR_TYPE: &str = "design";

/// Rasterized snapshot of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRenderedNode {
    pub node_id: NodeId,
    #[serde(with = "image_bytes")]
    pub image_data_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub node_id: NodeId,
    pub prediction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassName {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopKProbability {
    pub class_name: ClassName,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUrlPayload {
    #[serde(rename = "modelURL")]
    pub model_url: String,
}

/// UI -> core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiMessage {
    #[serde(rename = "clickPredictButton")]
    ClickPredictButton,
    #[serde(rename = "response")]
    Response { payload: Vec<PredictionResult> },
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "resetModelURL")]
    ResetModelUrl,
    #[serde(rename = "updateModelURL")]
    UpdateModelUrl { payload: String },
    #[serde(rename = "top3Probabilities")]
    Top3Probabilities {
        id: NodeId,
        payload: Vec<TopKProbability>,
    },
    #[serde(rename = "close")]
    Close,
}

impl UiMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            UiMessage::ClickPredictButton => "clickPredictButton",
            UiMessage::Response { .. } => "response",
            UiMessage::Init => "init",
            UiMessage::ResetModelUrl => "resetModelURL",
            UiMessage::UpdateModelUrl { .. } => "updateModelURL",
            UiMessage::Top3Probabilities { .. } => "top3Probabilities",
            UiMessage::Close => "close",
        }
    }
}

/// Core -> UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoreMessage {
    #[serde(rename = "devModeSelection")]
    DevModeSelection {
        payload: Option<Value>,
        #[serde(rename = "editorType")]
        editor_type: String,
    },
    #[serde(rename = "emptySelection")]
    EmptySelection,
    #[serde(rename = "processingRequest")]
    ProcessingRequest {
        data: Vec<BinaryRenderedNode>,
        filename: String,
    },
    #[serde(rename = "modelURL")]
    ModelUrl { payload: ModelUrlPayload },
}

impl CoreMessage {
    pub fn handshake() -> Self {
        CoreMessage::DevModeSelection {
            payload: None,
            editor_type: EDITOR_TYPE.to_string(),
        }
    }

    pub fn model_url(url: impl Into<String>) -> Self {
        CoreMessage::ModelUrl {
            payload: ModelUrlPayload {
                model_url: url.into(),
            },
        }
    }
}

mod image_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ui_messages_decode_from_wire_names() {
        let msg: UiMessage = serde_json::from_value(json!({
            "type": "response",
            "payload": [{"nodeId": "1:3", "prediction": "Button"}]
        }))
        .unwrap();
        assert_eq!(
            msg,
            UiMessage::Response {
                payload: vec![PredictionResult {
                    node_id: "1:3".into(),
                    prediction: "Button".to_string(),
                }]
            }
        );

        let msg: UiMessage =
            serde_json::from_value(json!({"type": "updateModelURL", "payload": "https://m/"}))
                .unwrap();
        assert_eq!(msg.kind(), "updateModelURL");

        let msg: UiMessage =
            serde_json::from_value(json!({"type": "init", "payload": null})).unwrap();
        assert_eq!(msg, UiMessage::Init);
    }

    #[test]
    fn top_k_payload_uses_camel_case_class_name() {
        let msg: UiMessage = serde_json::from_value(json!({
            "type": "top3Probabilities",
            "id": "1:1",
            "payload": [{"className": {"name": "Card", "url": "https://docs/card"}, "probability": 0.91}]
        }))
        .unwrap();
        let UiMessage::Top3Probabilities { id, payload } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(id.as_str(), "1:1");
        assert_eq!(payload[0].class_name.name, "Card");
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        assert!(serde_json::from_value::<UiMessage>(json!({"type": "dance"})).is_err());
    }

    #[test]
    fn core_messages_encode_wire_shapes() {
        assert_eq!(
            serde_json::to_value(CoreMessage::handshake()).unwrap(),
            json!({"type": "devModeSelection", "payload": null, "editorType": "design"})
        );
        assert_eq!(
            serde_json::to_value(CoreMessage::model_url("https://m/")).unwrap(),
            json!({"type": "modelURL", "payload": {"modelURL": "https://m/"}})
        );
        assert_eq!(
            serde_json::to_value(CoreMessage::EmptySelection).unwrap(),
            json!({"type": "emptySelection"})
        );
    }

    #[test]
    fn rendered_bytes_travel_as_base64() {
        let msg = CoreMessage::ProcessingRequest {
            data: vec![BinaryRenderedNode {
                node_id: "1:1".into(),
                image_data_bytes: vec![0xFF, 0xD8, 0xFF],
            }],
            filename: "marketing_site_v2".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"][0]["imageDataBytes"], json!("/9j/"));
        assert_eq!(value["data"][0]["nodeId"], json!("1:1"));
        let back: CoreMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
