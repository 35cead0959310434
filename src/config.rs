use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub redis: RedisConfig,
    pub telegram: TelegramConfig,
    pub quota: QuotaConfig,
    pub packs: PackConfig,
    pub render: RenderConfig,
    pub input: InputLimits,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub bot_username: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub daily_limit: u32,
    pub window: Duration,
    pub privileged_users: Vec<i64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 3,
            window: Duration::from_secs(24 * 60 * 60),
            privileged_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackConfig {
    pub capacity: u32,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    pub deadline: Duration,
    pub verify_before_attach: bool,
    pub default_emoji: String,
    pub default_title: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            capacity: 120,
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(30),
            verify_before_attach: true,
            default_emoji: "😊".to_string(),
            default_title: "My Stickers".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub font_dir: PathBuf,
    pub font_registry: Option<PathBuf>,
    pub background_top: String,
    pub background_bottom: String,
    pub padding: u32,
    pub max_sticker_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_dir: PathBuf::from("fonts"),
            font_registry: None,
            background_top: "#38BDF8".to_string(),
            background_bottom: "#6366F1".to_string(),
            padding: 40,
            max_sticker_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputLimits {
    pub max_text_chars: usize,
    pub max_photo_bytes: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_text_chars: 200,
            max_photo_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let quota_defaults = QuotaConfig::default();
        let pack_defaults = PackConfig::default();
        let render_defaults = RenderConfig::default();
        let input_defaults = InputLimits::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT").unwrap_or(8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                api_key: env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            },
            storage: StorageConfig {
                backend: match env::var("STORAGE_BACKEND").as_deref() {
                    Ok("redis") => StorageBackend::Redis,
                    _ => StorageBackend::Memory,
                },
            },
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: parse_var("REDIS_PORT").unwrap_or(6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: parse_var("REDIS_DB").unwrap_or(0),
            },
            telegram: TelegramConfig {
                bot_token: env::var("BOT_TOKEN").unwrap_or_default(),
                bot_username: env::var("BOT_USERNAME").unwrap_or_else(|_| "sticker_bot".to_string()),
                api_url: env::var("TELEGRAM_API_URL")
                    .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            },
            quota: QuotaConfig {
                daily_limit: parse_var("DAILY_LIMIT").unwrap_or(quota_defaults.daily_limit),
                window: quota_defaults.window,
                privileged_users: env::var("PRIVILEGED_USERS")
                    .map(|ids| parse_id_list(&ids))
                    .unwrap_or_default(),
            },
            packs: PackConfig {
                capacity: parse_var("PACK_CAPACITY").unwrap_or(pack_defaults.capacity),
                max_attempts: parse_var("PACK_ATTACH_MAX_ATTEMPTS")
                    .unwrap_or(pack_defaults.max_attempts),
                base_backoff: parse_var("PACK_ATTACH_BASE_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(pack_defaults.base_backoff),
                max_backoff: parse_var("PACK_ATTACH_MAX_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(pack_defaults.max_backoff),
                attempt_timeout: parse_var("PACK_ATTACH_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(pack_defaults.attempt_timeout),
                deadline: parse_var("PACK_ATTACH_DEADLINE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(pack_defaults.deadline),
                verify_before_attach: parse_var("PACK_VERIFY_BEFORE_ATTACH")
                    .unwrap_or(pack_defaults.verify_before_attach),
                default_emoji: env::var("PACK_DEFAULT_EMOJI")
                    .unwrap_or(pack_defaults.default_emoji),
                default_title: env::var("PACK_DEFAULT_TITLE")
                    .unwrap_or(pack_defaults.default_title),
            },
            render: RenderConfig {
                font_dir: env::var("FONT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(render_defaults.font_dir),
                font_registry: env::var("FONT_REGISTRY").ok().map(PathBuf::from),
                background_top: env::var("BACKGROUND_TOP")
                    .unwrap_or(render_defaults.background_top),
                background_bottom: env::var("BACKGROUND_BOTTOM")
                    .unwrap_or(render_defaults.background_bottom),
                padding: render_defaults.padding,
                max_sticker_bytes: parse_var("MAX_STICKER_BYTES")
                    .unwrap_or(render_defaults.max_sticker_bytes),
            },
            input: InputLimits {
                max_text_chars: parse_var("MAX_TEXT_CHARS")
                    .unwrap_or(input_defaults.max_text_chars),
                max_photo_bytes: parse_var("MAX_PHOTO_BYTES")
                    .unwrap_or(input_defaults.max_photo_bytes),
            },
        }
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}
