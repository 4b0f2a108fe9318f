// ABOUTME: Model parameter document with the typed access contract shared across transports
// ABOUTME: Macro-generated getters/setters over a sectioned JSON document with merge support

use crate::client::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the fixed parameter catalog.
#[derive(Debug, Clone, Copy)]
struct ParamSpec {
    section: &'static str,
    name: &'static str,
    /// Whether a patch document may overwrite this parameter at runtime.
    mergeable: bool,
    /// Alternate name read through when the primary name is absent.
    fallback: Option<&'static str>,
}

/// Extended model parameters: a tagged, sectioned JSON document.
///
/// The document groups parameters into sections (`DEVICE`, `PRE_PROCESS`,
/// `POST_PROCESS`, `MODEL_PARAMETERS`). Typed accessors cover the fixed
/// catalog below; anything else in the document is carried opaquely, so a
/// zoo listing round-trips unchanged through the client.
///
/// Each catalog entry has a default returned when neither the primary nor
/// the fallback name is present, and a runtime-mergeable flag consulted by
/// [`ModelParams::merge`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelParams {
    doc: Map<String, Value>,
}

/// Generates the catalog table plus typed accessors. An entry without a
/// `(set_*)` setter ident only gets a getter; its setter is hand-written
/// (validation).
macro_rules! params {
    ( $( $(#[$doc:meta])* $getter:ident $(($setter:ident))? : $ty:ty = $default:expr;
          section $section:literal, name $name:literal, mergeable $mergeable:literal
          $(, fallback $fallback:literal)? ; )* ) => {

        const CATALOG: &[ParamSpec] = &[
            $( ParamSpec {
                section: $section,
                name: $name,
                mergeable: $mergeable,
                fallback: params!(@fb $($fallback)?),
            }, )*
        ];

        impl ModelParams {
            $(
                $(#[$doc])*
                pub fn $getter(&self) -> $ty {
                    self.get_or($section, $name, params!(@fb $($fallback)?), $default)
                }

                $(
                    pub fn $setter(&mut self, value: $ty) {
                        self.set_raw($section, $name, ::serde_json::json!(value));
                    }
                )?
            )*
        }
    };
    (@fb) => { None };
    (@fb $fallback:literal) => { Some($fallback) };
}

params! {
    /// Target device kind the model runs on, e.g. `"CPU"`.
    device_type(set_device_type): String = String::from("CPU");
        section "DEVICE", name "DeviceType", mergeable true;

    /// Index of the device when several of the same kind are installed.
    device_id(set_device_id): u64 = 0;
        section "DEVICE", name "DeviceId", mergeable true;

    /// How many frames the device batches before dispatch.
    eager_batch_size(set_eager_batch_size): u64 = 8;
        section "DEVICE", name "EagerBatchSize", mergeable true;

    /// Server-side path of the model artifact.
    model_path(set_model_path): String = String::new();
        section "MODEL_PARAMETERS", name "ModelPath", mergeable false;

    /// Whether the model weights are quantized.
    model_quantized(set_model_quantized): bool = false;
        section "MODEL_PARAMETERS", name "ModelQuantized", mergeable false;

    /// Input tensor shape; set via the validating [`ModelParams::set_input_shape`].
    input_shape: Vec<u64> = Vec::new();
        section "PRE_PROCESS", name "InputShape", mergeable false;

    /// Padding strategy applied when the input aspect ratio differs.
    input_pad_method(set_input_pad_method): String = String::from("letterbox");
        section "PRE_PROCESS", name "InputPadMethod", mergeable true;

    /// Resize interpolation method.
    input_resize_method(set_input_resize_method): String = String::from("bilinear");
        section "PRE_PROCESS", name "InputResizeMethod", mergeable true,
        fallback "InputInterpolationMethod";

    /// Postprocessor applied to raw tensor output.
    output_postprocess_type(set_output_postprocess_type): String = String::from("None");
        section "POST_PROCESS", name "OutputPostprocessType", mergeable false;

    /// Minimum confidence for a detection to be reported.
    output_conf_threshold(set_output_conf_threshold): f64 = 0.1;
        section "POST_PROCESS", name "OutputConfThreshold", mergeable true;

    /// Non-maximum-suppression overlap threshold.
    output_nms_threshold(set_output_nms_threshold): f64 = 0.6;
        section "POST_PROCESS", name "OutputNMSThreshold", mergeable true;

    /// Cap on reported detections per frame.
    max_detections(set_max_detections): u64 = 20;
        section "POST_PROCESS", name "MaxDetections", mergeable true,
        fallback "MaxObjects";
}

impl ModelParams {
    /// An empty parameter document; getters return catalog defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a document received from the server.
    ///
    /// Fails with [`ClientError::BadParameter`] when the value is not a
    /// JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(doc) => Ok(ModelParams { doc }),
            other => Err(ClientError::BadParameter(format!(
                "model parameters must be a JSON object, got {other}"
            ))),
        }
    }

    /// The underlying document, as sent on the wire.
    pub fn to_value(&self) -> Value {
        Value::Object(self.doc.clone())
    }

    /// Set the input tensor shape.
    ///
    /// The shape must have 1 to 4 dimensions, none of them zero; anything
    /// else fails with [`ClientError::BadParameter`].
    pub fn set_input_shape(&mut self, shape: Vec<u64>) -> Result<()> {
        if shape.is_empty() || shape.len() > 4 {
            return Err(ClientError::BadParameter(format!(
                "input shape must have 1 to 4 dimensions, got {}",
                shape.len()
            )));
        }
        if shape.contains(&0) {
            return Err(ClientError::BadParameter(
                "input shape dimensions must be non-zero".into(),
            ));
        }
        self.set_raw("PRE_PROCESS", "InputShape", serde_json::json!(shape));
        Ok(())
    }

    /// Overlay `patch` onto this document, overwriting only the catalog
    /// parameters flagged runtime-mergeable. Everything else in `patch`
    /// is ignored.
    pub fn merge(&mut self, patch: &ModelParams) {
        for spec in CATALOG.iter().filter(|s| s.mergeable) {
            if let Some(value) = patch.lookup(spec.section, spec.name) {
                self.set_raw(spec.section, spec.name, value.clone());
            }
        }
    }

    fn lookup(&self, section: &str, name: &str) -> Option<&Value> {
        self.doc.get(section)?.get(name)
    }

    fn get_or<T: serde::de::DeserializeOwned>(
        &self,
        section: &str,
        name: &str,
        fallback: Option<&str>,
        default: T,
    ) -> T {
        self.lookup(section, name)
            .or_else(|| fallback.and_then(|f| self.lookup(section, f)))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    fn set_raw(&mut self, section: &str, name: &str, value: Value) {
        let entry = self
            .doc
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(obj) = entry.as_object_mut() {
            obj.insert(name.to_string(), value);
        }
    }
}
