//! Skin-lesion image classifier.
//!
//! The production network is a ResNet-50 with its final layer replaced by a
//! 23-way linear head, exported to ONNX and executed through ONNX Runtime.
//! Preprocessing, softmax and label mapping live in [`ImageClassifier`] and
//! are independent of the backend, so they can be exercised with an
//! in-process [`ClassifierBackend`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, imageops::FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InferenceError, ModelLoadError};
use crate::labels::{DERMNET_CLASSES, NUM_CLASSES};

/// Spatial resolution the network was trained on.
pub const INPUT_SIZE: u32 = 224;

/// ImageNet channel statistics used during training.
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Outcome of classifying one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// One of [`DERMNET_CLASSES`].
    pub label: String,
    /// Softmax probability of `label`, in `[0, 1]`.
    pub confidence: f32,
}

/// Classifier shared by every session in the process.
///
/// Loading happens once at startup; a failure is kept as-is so that every
/// call site decides explicitly what to do without a model.
pub type LoadedClassifier = std::result::Result<Arc<ImageClassifier>, ModelLoadError>;

/// Runs the network on a preprocessed `[1, 3, H, W]` tensor and returns the
/// raw scores of the classification head.
pub trait ClassifierBackend: Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

/// ONNX Runtime backend.
pub struct OnnxBackend {
    session: Mutex<Session>,
}

impl OnnxBackend {
    /// Load an ONNX model and check that its signature matches
    /// `[N, 3, 224, 224] -> [N, 23]`.
    ///
    /// The ONNX Runtime library is taken from `ORT_DYLIB_PATH`, falling back
    /// to the platform's default library name.
    ///
    /// # Errors
    /// Returns `ModelLoadError` if the file is missing, the runtime library
    /// cannot be loaded, the file is not a valid model, or the model declares
    /// incompatible input/output dimensions.
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        Self::load_with_runtime(model_path, &runtime_library())
    }

    /// Like [`OnnxBackend::load`], with an explicit ONNX Runtime library path.
    pub fn load_with_runtime(model_path: &Path, runtime: &Path) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }

        // Session creation panics if the runtime has not been loaded yet.
        ort::init_from(runtime)
            .map_err(|e| ModelLoadError::Runtime(format!("ONNX Runtime library: {}", e)))?
            .commit();

        info!(model = %model_path.display(), "Loading classifier model");

        let session = Session::builder()
            .map_err(|e| ModelLoadError::Runtime(format!("ONNX session builder: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;

        validate_signature(&session)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

fn runtime_library() -> PathBuf {
    match std::env::var("ORT_DYLIB_PATH") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ if cfg!(target_os = "windows") => PathBuf::from("onnxruntime.dll"),
        _ if cfg!(target_os = "macos") => PathBuf::from("libonnxruntime.dylib"),
        _ => PathBuf::from("libonnxruntime.so"),
    }
}

impl ClassifierBackend for OnnxBackend {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let tensor = TensorRef::from_array_view(input)
            .map_err(|e| InferenceError::Backend(format!("input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Backend("model session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let (_shape, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Backend(format!("output tensor: {}", e)))?;

        Ok(scores.to_vec())
    }
}

fn validate_signature(session: &Session) -> Result<(), ModelLoadError> {
    let input = session
        .inputs()
        .first()
        .ok_or_else(|| ModelLoadError::Runtime("model declares no inputs".to_string()))?;
    let input_dims: Vec<i64> = input
        .dtype()
        .tensor_shape()
        .map(|shape| shape.iter().copied().collect())
        .ok_or_else(|| ModelLoadError::Runtime("model input is not a tensor".to_string()))?;

    let output = session
        .outputs()
        .first()
        .ok_or_else(|| ModelLoadError::Runtime("model declares no outputs".to_string()))?;
    let output_classes = output
        .dtype()
        .tensor_shape()
        .and_then(|shape| shape.last().copied());

    check_signature(&input_dims, output_classes)
}

/// Check declared model dimensions against `[N, 3, 224, 224] -> [N, 23]`.
///
/// Non-positive dimensions are symbolic (e.g. batch size) and match anything.
pub fn check_signature(
    input_dims: &[i64],
    output_classes: Option<i64>,
) -> Result<(), ModelLoadError> {
    let expected_input = [-1, 3, INPUT_SIZE as i64, INPUT_SIZE as i64];

    let compatible = input_dims.len() == expected_input.len()
        && input_dims
            .iter()
            .zip(expected_input)
            .skip(1)
            .all(|(&actual, expected)| actual <= 0 || actual == expected);
    if !compatible {
        return Err(ModelLoadError::InputShape {
            expected: expected_input.to_vec(),
            actual: input_dims.to_vec(),
        });
    }

    if let Some(classes) = output_classes {
        if classes > 0 && classes as usize != NUM_CLASSES {
            return Err(ModelLoadError::OutputShape {
                expected: NUM_CLASSES,
                actual: classes,
            });
        }
    }

    Ok(())
}

/// Fixed-architecture 23-way skin-lesion classifier.
pub struct ImageClassifier {
    backend: Box<dyn ClassifierBackend>,
    classes: &'static [&'static str],
}

impl std::fmt::Debug for ImageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClassifier")
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl ImageClassifier {
    /// Load the ONNX model at `model_path`.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let backend = OnnxBackend::load(model_path.as_ref())?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Load once and wrap for sharing across sessions.
    pub fn load_shared(model_path: impl AsRef<Path>) -> LoadedClassifier {
        Self::load(model_path).map(Arc::new)
    }

    pub fn with_backend(backend: Box<dyn ClassifierBackend>) -> Self {
        Self {
            backend,
            classes: &DERMNET_CLASSES,
        }
    }

    pub fn classes(&self) -> &[&'static str] {
        self.classes
    }

    /// Decode raw upload bytes and classify them.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<ClassificationResult, InferenceError> {
        let image =
            image::load_from_memory(bytes).map_err(|e| InferenceError::Decode(e.to_string()))?;
        self.predict(&image)
    }

    /// Classify an image, returning the most probable label.
    pub fn predict(&self, image: &DynamicImage) -> Result<ClassificationResult, InferenceError> {
        let probabilities = self.probabilities(image)?;

        // Ties resolve to the lowest index.
        let (index, confidence) = probabilities.iter().copied().enumerate().fold(
            (0, f32::MIN),
            |best, (i, p)| if p > best.1 { (i, p) } else { best },
        );

        let result = ClassificationResult {
            label: self.classes[index].to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        };
        debug!(label = %result.label, confidence = result.confidence, "Image classified");
        Ok(result)
    }

    /// Full softmax distribution over the label set, in label order.
    pub fn probabilities(&self, image: &DynamicImage) -> Result<Vec<f32>, InferenceError> {
        let input = preprocess(image);
        let scores = self.backend.forward(&input)?;

        if scores.len() != self.classes.len() {
            return Err(InferenceError::OutputLength {
                expected: self.classes.len(),
                actual: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::Backend(
                "model produced non-finite scores".to_string(),
            ));
        }

        Ok(softmax(&scores))
    }
}

/// Convert any image to the normalized NCHW tensor the network expects.
///
/// Color mode is normalized to RGB first, so grayscale, alpha and 16-bit
/// inputs are all accepted.
pub fn preprocess(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            let value = f32::from(pixel.0[channel]) / 255.0;
            tensor[[0, channel, y as usize, x as usize]] =
                (value - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
        }
    }
    tensor
}

/// Numerically stable softmax.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = scores.iter().map(|&s| f64::from(s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| (e / sum) as f32).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend returning the same scores for every input.
    pub(crate) struct FixedBackend {
        pub scores: Vec<f32>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FixedBackend {
        pub(crate) fn favoring(index: usize, margin: f32) -> Self {
            let mut scores = vec![0.0; NUM_CLASSES];
            scores[index] = margin;
            Self {
                scores,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ClassifierBackend for FixedBackend {
        fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    /// Backend whose scores depend on the mean of each input channel.
    struct ChannelMeanBackend;

    impl ClassifierBackend for ChannelMeanBackend {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let means: Vec<f32> = (0..3)
                .map(|c| input.index_axis(ndarray::Axis(1), c).mean().unwrap_or(0.0))
                .collect();
            Ok((0..NUM_CLASSES)
                .map(|i| means[i % 3] * (i as f32 + 1.0) / NUM_CLASSES as f32)
                .collect())
        }
    }

    pub(crate) fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb(color)));
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 40, Rgb([255, 255, 255])));
        let tensor = preprocess(&white);

        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        for channel in 0..3 {
            let expected = (1.0 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
            assert!((tensor[[0, channel, 0, 0]] - expected).abs() < 1e-5);
            assert!((tensor[[0, channel, 223, 223]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_preprocess_normalizes_color_mode() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([0])));
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 128])));

        for image in [gray, rgba] {
            let tensor = preprocess(&image);
            assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
            let expected = -CHANNEL_MEAN[2] / CHANNEL_STD[2];
            assert!((tensor[[0, 2, 100, 100]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0, -50.0, 1000.0]);
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(probabilities[4] > 0.99);
    }

    #[test]
    fn test_predict_maps_argmax_to_label() {
        let classifier = ImageClassifier::with_backend(Box::new(FixedBackend::favoring(5, 4.0)));
        let image = DynamicImage::new_rgb8(8, 8);

        let result = classifier.predict(&image).unwrap();
        assert_eq!(result.label, "Eczema Photos");

        let probabilities = classifier.probabilities(&image).unwrap();
        assert_eq!(probabilities.len(), NUM_CLASSES);
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((result.confidence - probabilities[5]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_predict_ties_pick_first_label() {
        let classifier = ImageClassifier::with_backend(Box::new(FixedBackend::favoring(0, 0.0)));
        let result = classifier.predict(&DynamicImage::new_rgb8(4, 4)).unwrap();
        assert_eq!(result.label, DERMNET_CLASSES[0]);
        assert!((result.confidence - 1.0 / NUM_CLASSES as f32).abs() < 1e-5);
    }

    #[test]
    fn test_predict_is_deterministic_and_bounded() {
        let classifier = ImageClassifier::with_backend(Box::new(ChannelMeanBackend));

        for color in [[200, 30, 30], [10, 220, 90], [0, 0, 0], [255, 255, 255]] {
            let bytes = png_bytes(color);
            let first = classifier.predict_bytes(&bytes).unwrap();
            let second = classifier.predict_bytes(&bytes).unwrap();

            assert_eq!(first, second);
            assert!(DERMNET_CLASSES.contains(&first.label.as_str()));
            assert!((0.0..=1.0).contains(&first.confidence));
        }
    }

    #[test]
    fn test_predict_bytes_rejects_garbage() {
        let classifier = ImageClassifier::with_backend(Box::new(FixedBackend::favoring(1, 1.0)));
        let err = classifier.predict_bytes(b"definitely not a png").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn test_wrong_output_length_is_an_error() {
        let backend = FixedBackend {
            scores: vec![0.5; 10],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let classifier = ImageClassifier::with_backend(Box::new(backend));
        let err = classifier.predict(&DynamicImage::new_rgb8(4, 4)).unwrap_err();
        assert_eq!(
            err,
            InferenceError::OutputLength {
                expected: NUM_CLASSES,
                actual: 10
            }
        );
    }

    #[test]
    fn test_non_finite_scores_are_an_error() {
        let mut backend = FixedBackend::favoring(2, 1.0);
        backend.scores[7] = f32::NAN;
        let classifier = ImageClassifier::with_backend(Box::new(backend));
        let err = classifier.predict(&DynamicImage::new_rgb8(4, 4)).unwrap_err();
        assert!(matches!(err, InferenceError::Backend(_)));
    }

    #[test]
    fn test_load_missing_model() {
        let err = ImageClassifier::load("/nonexistent/ResNet50_dermnet23.onnx").unwrap_err();
        assert!(matches!(err, ModelLoadError::NotFound(_)));

        let shared = ImageClassifier::load_shared("/nonexistent/ResNet50_dermnet23.onnx");
        assert!(shared.is_err());
    }

    #[test]
    fn test_load_without_runtime_library_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\x00\x01 this is not an onnx graph").unwrap();

        let runtime = Path::new("/nonexistent/libonnxruntime.so");
        let err = match OnnxBackend::load_with_runtime(file.path(), runtime) {
            Err(err) => err,
            Ok(_) => panic!("garbage model loaded"),
        };
        assert!(matches!(err, ModelLoadError::Runtime(_)));
    }

    #[test]
    fn test_load_corrupt_model() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\x00\x01 this is not an onnx graph").unwrap();

        // With or without a runtime library on this machine, loading fails cleanly.
        let err = ImageClassifier::load(file.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Runtime(_)));
    }

    #[test]
    fn test_signature_accepts_dermnet_shape() {
        assert!(check_signature(&[-1, 3, 224, 224], Some(23)).is_ok());
        assert!(check_signature(&[1, 3, 224, 224], Some(23)).is_ok());
        assert!(check_signature(&[-1, 3, 224, 224], Some(-1)).is_ok());
        assert!(check_signature(&[-1, 3, -1, -1], None).is_ok());
    }

    #[test]
    fn test_signature_rejects_imagenet_head() {
        assert_eq!(
            check_signature(&[1, 3, 224, 224], Some(1000)).unwrap_err(),
            ModelLoadError::OutputShape {
                expected: NUM_CLASSES,
                actual: 1000
            }
        );
    }

    #[test]
    fn test_signature_rejects_wrong_input() {
        assert_eq!(
            check_signature(&[1, 1, 224, 224], Some(23)).unwrap_err(),
            ModelLoadError::InputShape {
                expected: vec![-1, 3, 224, 224],
                actual: vec![1, 1, 224, 224]
            }
        );
        assert!(matches!(
            check_signature(&[3, 224, 224], Some(23)),
            Err(ModelLoadError::InputShape { .. })
        ));
        assert!(matches!(
            check_signature(&[1, 3, 299, 299], Some(23)),
            Err(ModelLoadError::InputShape { .. })
        ));
    }
}
