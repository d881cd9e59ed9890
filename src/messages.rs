//! Localized console messages

use clap::ValueEnum;
use std::env;
use std::path::Path;

/// Output language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Lang {
    #[default]
    En,
    Zh,
}

impl Lang {
    /// Pick a language from the locale environment, defaulting to English
    pub fn detect() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| env::var(var).ok())
            .find(|value| !value.is_empty())
            .map(|value| Self::from_locale(&value))
            .unwrap_or_default()
    }

    /// Map a locale string such as `zh_CN.UTF-8` to a language
    pub fn from_locale(locale: &str) -> Self {
        let lower = locale.to_lowercase();
        if lower.starts_with("zh") || lower.contains("chinese") {
            Lang::Zh
        } else {
            Lang::En
        }
    }
}

/// User-facing message catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct Messages {
    lang: Lang,
}

impl Messages {
    pub fn new(lang: Lang) -> Self {
        Self { lang }
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn terminating(&self) -> String {
        match self.lang {
            Lang::En => "Safely terminating process...".to_string(),
            Lang::Zh => "正在安全终止进程...".to_string(),
        }
    }

    pub fn file_deleted(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("✗ File deleted {}", path),
            Lang::Zh => format!("✗ 文件已删除 {}", path),
        }
    }

    pub fn new_file(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("✓ New file detected {}", path),
            Lang::Zh => format!("✓ 发现新文件 {}", path),
        }
    }

    pub fn verifying(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("Verifying {}", path),
            Lang::Zh => format!("正在验证 {}", path),
        }
    }

    pub fn verify_success(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("✓ Verification passed {}", path),
            Lang::Zh => format!("✓ 验证通过 {}", path),
        }
    }

    pub fn encrypted_file(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("🔒 Encrypted file {}", path),
            Lang::Zh => format!("🔒 加密文件 {}", path),
        }
    }

    pub fn verify_fail(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("✗ File corrupted {}", path),
            Lang::Zh => format!("✗ 文件损坏 {}", path),
        }
    }

    pub fn interrupted(&self, path: &str) -> String {
        match self.lang {
            Lang::En => format!("🛑 Verification interrupted {}", path),
            Lang::Zh => format!("🛑 验证已中断 {}", path),
        }
    }

    pub fn process_error(&self, path: &str, error: &str) -> String {
        match self.lang {
            Lang::En => format!("! Processing error {}: {}", path, error),
            Lang::Zh => format!("! 处理错误 {}: {}", path, error),
        }
    }

    pub fn files_to_verify(&self, total: usize) -> String {
        match self.lang {
            Lang::En => format!("▶ Found {} files to verify", total),
            Lang::Zh => format!("▶ 发现 {} 个待验证文件", total),
        }
    }

    pub fn dir_not_exist(&self, path: &Path) -> String {
        match self.lang {
            Lang::En => format!("Error: Directory {} does not exist", path.display()),
            Lang::Zh => format!("错误：目录 {} 不存在", path.display()),
        }
    }

    pub fn engine_not_found(&self, path: &Path) -> String {
        match self.lang {
            Lang::En => format!("7z not found at {}", path.display()),
            Lang::Zh => format!("未找到 7z（路径：{}）", path.display()),
        }
    }
}

/// Prints catalog messages to the terminal, or nowhere
#[derive(Debug, Clone, Copy)]
pub struct Console {
    messages: Messages,
    enabled: bool,
}

impl Console {
    pub fn new(messages: Messages) -> Self {
        Self {
            messages,
            enabled: true,
        }
    }

    /// A console that swallows everything
    pub fn silent() -> Self {
        Self {
            messages: Messages::default(),
            enabled: false,
        }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Print one line built from the catalog
    pub fn say<F>(&self, build: F)
    where
        F: FnOnce(&Messages) -> String,
    {
        if self.enabled {
            println!("{}", build(&self.messages));
        }
    }
}
