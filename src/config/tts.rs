use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Выбор вычислительного устройства
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Auto,
    Cuda,
    Cpu,
}

impl Default for DevicePreference {
    fn default() -> Self {
        DevicePreference::Auto
    }
}

impl DevicePreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "cuda" | "gpu" => Some(Self::Cuda),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }
}

// Настройки внешнего бэкенда синтеза
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    // Каталог с моделью (MODEL_PATH)
    pub model_path: PathBuf,

    // Рабочий каталог бэкенда: cwd процесса и корень поиска аудио
    pub backend_dir: PathBuf,

    // Скрипт инференса, абсолютный или относительно backend_dir
    pub inference_script: PathBuf,

    // Интерпретатор для запуска скрипта
    pub interpreter: String,

    // Ожидаемый файл-манифест модели
    pub manifest_name: String,

    pub device: DevicePreference,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            model_path: PathBuf::from("/app/models/VibeVoice-Large"),
            backend_dir: PathBuf::from("/app/VibeVoice"),
            inference_script: PathBuf::from("demo/inference_from_file.py"),
            interpreter: "python".to_string(),
            manifest_name: "config.json".to_string(),
            device: DevicePreference::default(),
        }
    }
}

impl BackendConfig {
    /// Absolute location of the inference script.
    pub fn script_path(&self) -> PathBuf {
        if self.inference_script.is_absolute() {
            self.inference_script.clone()
        } else {
            self.backend_dir.join(&self.inference_script)
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.model_path.join(&self.manifest_name)
    }

    pub fn working_dir(&self) -> &Path {
        &self.backend_dir
    }
}
