use clap::{Args, Parser, Subcommand};
use std::env;
use std::fmt::Debug;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Scrape rednote search results, post images and comments; filter, OCR and screen what was collected"
)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "NOTECRAWL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    pub browser: BrowserSettings,

    #[command(flatten)]
    pub openai: OpenAISettings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct BrowserSettings {
    /// Base URL of the site being scraped
    #[arg(
        long,
        global = true,
        env = "NOTECRAWL_SITE_URL",
        default_value = "https://www.xiaohongshu.com"
    )]
    pub site_url: String,

    /// Path to the Chrome/Chromium executable (auto-detected when omitted)
    #[arg(long, global = true, env = "NOTECRAWL_CHROME_EXECUTABLE")]
    pub chrome_executable: Option<PathBuf>,

    /// Chrome user data directory, used to reuse a logged-in profile
    #[arg(long, global = true, env = "NOTECRAWL_CHROME_USER_DATA_DIR")]
    pub chrome_user_data_dir: Option<PathBuf>,

    /// Profile folder name inside the user data directory
    #[arg(long, global = true, env = "NOTECRAWL_CHROME_PROFILE", default_value = "Default")]
    pub chrome_profile: String,

    /// Run the browser without a window
    #[arg(long, global = true, env = "NOTECRAWL_HEADLESS")]
    pub headless: bool,

    /// Connect to an already running browser (ws:// or http:// debugging URL) instead of launching one
    #[arg(long, global = true, env = "NOTECRAWL_REMOTE_BROWSER_URL")]
    pub remote_browser_url: Option<String>,

    /// Seconds to wait for a post page to show its content indicator
    #[arg(long, global = true, env = "NOTECRAWL_PAGE_LOAD_TIMEOUT", default_value_t = 20)]
    pub page_load_timeout_seconds: u64,

    /// Seconds to wait for a single element to appear
    #[arg(long, global = true, env = "NOTECRAWL_ELEMENT_WAIT", default_value_t = 10)]
    pub element_wait_seconds: u64,
}

#[derive(Debug, Clone, Args)]
pub struct OpenAISettings {
    /// API key for the chat completions endpoint (environment only in practice)
    #[arg(long, global = true, env = "NOTECRAWL_OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API (e.g. DashScope compatible mode)
    #[arg(
        long,
        global = true,
        env = "NOTECRAWL_OPENAI_CUSTOM_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_custom_url: String,

    /// Multimodal model to use
    #[arg(long, global = true, env = "NOTECRAWL_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// Maximum number of tokens to generate per answer
    #[arg(long, global = true, env = "NOTECRAWL_OPENAI_MAX_TOKENS", default_value_t = 1000)]
    pub openai_max_tokens: u32,

    /// Request timeout in seconds for a single API call
    #[arg(long, global = true, env = "NOTECRAWL_OPENAI_TIMEOUT", default_value_t = 60)]
    pub openai_timeout_seconds: u64,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Search prompts and collect post links (and optionally cover images)
    Search(SearchArgs),
    /// Download every carousel image of the listed posts
    Images(ImagesArgs),
    /// Collect the comments of the listed posts into one file
    Comments(CommentsArgs),
    /// Drop @-mention and Chinese lines from a comment file, de-duplicating the rest
    Filter(FilterArgs),
    /// Write the sorted unique non-empty lines of a file
    Unique(UniqueArgs),
    /// OCR every image sub-directory of a folder into a CSV file
    Ocr(OcrArgs),
    /// Ask a multimodal LLM to flag prompt-injection content in images
    Detect(DetectArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PaginationArgs {
    /// Hard cap on scroll iterations
    #[arg(long, env = "NOTECRAWL_MAX_SCROLLS", default_value_t = 50)]
    pub max_scrolls: u32,

    /// Iterations that must pass before a stall may stop the loop
    #[arg(long, env = "NOTECRAWL_MIN_SCROLLS", default_value_t = 20)]
    pub min_scrolls: u32,

    /// Consecutive iterations without new items that stop the loop
    #[arg(long, env = "NOTECRAWL_STALL_THRESHOLD", default_value_t = 5)]
    pub stall_threshold: u32,

    /// Milliseconds to pause after each scroll
    #[arg(long, env = "NOTECRAWL_SCROLL_PAUSE_MS", default_value_t = 3000)]
    pub scroll_pause_ms: u64,

    /// Pixels per window scroll step
    #[arg(long, env = "NOTECRAWL_SCROLL_INCREMENT", default_value_t = 1000)]
    pub scroll_increment: i64,
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// File with one search prompt per line
    pub prompts_file: PathBuf,

    /// Directory that receives one timestamped folder per prompt
    #[arg(
        long,
        short,
        env = "NOTECRAWL_SEARCH_OUTPUT_DIR",
        default_value = "downloaded_images"
    )]
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub pagination: PaginationArgs,

    /// Also download the collected cover images
    #[arg(long, env = "NOTECRAWL_SEARCH_DOWNLOAD")]
    pub download: bool,

    /// Only keep cover images whose host contains this value (empty keeps all)
    #[arg(
        long,
        env = "NOTECRAWL_SEARCH_IMAGE_HOST",
        default_value = "sns-webpic-qc.xhscdn.com"
    )]
    pub image_host: String,

    /// Seconds to wait between prompts
    #[arg(long, env = "NOTECRAWL_SEARCH_PROMPT_WAIT_SECONDS", default_value_t = 5)]
    pub prompt_wait_seconds: u64,
}

#[derive(Debug, Clone, Args)]
pub struct ImagesArgs {
    /// File with one post URL per line
    pub post_links_file: PathBuf,

    /// Directory that receives one folder per post
    #[arg(
        long,
        short,
        env = "NOTECRAWL_IMAGES_OUTPUT_DIR",
        default_value = "downloaded_images"
    )]
    pub output_dir: PathBuf,

    /// Safety limit for carousel "next" clicks
    #[arg(long, env = "NOTECRAWL_IMAGES_MAX_SLIDER_CLICKS", default_value_t = 15)]
    pub max_slider_clicks: u32,

    /// Seconds to wait between posts
    #[arg(long, env = "NOTECRAWL_IMAGES_POST_WAIT_SECONDS", default_value_t = 4)]
    pub post_wait_seconds: u64,
}

#[derive(Debug, Clone, Args)]
pub struct CommentsArgs {
    /// File with one post URL per line
    pub post_links_file: PathBuf,

    /// File that receives every collected comment, one per line
    #[arg(
        long,
        short,
        env = "NOTECRAWL_COMMENTS_OUTPUT",
        default_value = "all_xiaohongshu_comments.txt"
    )]
    pub output: PathBuf,

    #[command(flatten)]
    pub pagination: PaginationArgs,

    /// Seconds to wait between posts
    #[arg(long, env = "NOTECRAWL_COMMENTS_POST_WAIT_SECONDS", default_value_t = 15)]
    pub post_wait_seconds: u64,
}

#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Raw comment file
    #[arg(env = "NOTECRAWL_FILTER_INPUT", default_value = "all_xiaohongshu_comments.txt")]
    pub input: PathBuf,

    /// Filtered output file
    #[arg(env = "NOTECRAWL_FILTER_OUTPUT", default_value = "non_chinese_comments.txt")]
    pub output: PathBuf,

    /// Keep lines starting with '@'
    #[arg(long, env = "NOTECRAWL_FILTER_KEEP_MENTIONS")]
    pub keep_mentions: bool,

    /// Keep lines containing Chinese characters
    #[arg(long, env = "NOTECRAWL_FILTER_KEEP_CHINESE")]
    pub keep_chinese: bool,

    /// Additionally write the sorted unique lines of the output here
    #[arg(long, env = "NOTECRAWL_FILTER_UNIQUE_OUTPUT")]
    pub unique_output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct UniqueArgs {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct OcrArgs {
    /// Folder whose sub-directories contain images
    pub root_dir: PathBuf,

    /// Output CSV file
    #[arg(long, short, env = "NOTECRAWL_OCR_OUT", default_value = "ocr_output.csv")]
    pub out: PathBuf,

    /// Tesseract language list
    #[arg(long, env = "NOTECRAWL_OCR_LANG", default_value = "eng+chi_sim")]
    pub lang: String,

    /// Tesseract page segmentation mode
    #[arg(long, env = "NOTECRAWL_OCR_PSM", default_value_t = 6, value_parser = validate_psm)]
    pub psm: u8,

    /// Skip grayscale/autocontrast/median preprocessing
    #[arg(long, env = "NOTECRAWL_OCR_NO_PREPROCESS")]
    pub no_preprocess: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DetectArgs {
    /// Directory scanned recursively for .png/.jpg/.jpeg images
    #[arg(env = "NOTECRAWL_DETECT_IMAGES_DIR", default_value = "llm_detection_images")]
    pub images_dir: PathBuf,

    /// Directory that receives the report
    #[arg(long, env = "NOTECRAWL_DETECT_REPORTS_DIR", default_value = "llm_reports")]
    pub reports_dir: PathBuf,

    /// Milliseconds to wait between API calls
    #[arg(long, env = "NOTECRAWL_DETECT_CALL_DELAY_MS", default_value_t = 2000)]
    pub call_delay_ms: u64,
}

/// Validate that a tesseract page segmentation mode exists
fn validate_psm(value: &str) -> Result<u8, String> {
    let psm: u8 = value
        .parse()
        .map_err(|_| format!("psm must be a number between 0 and 13, got '{}'", value))?;
    if psm > 13 {
        return Err(format!("psm must be a number between 0 and 13, got '{}'", value));
    }
    Ok(psm)
}

/// Validate the stop-condition knobs of a pagination loop
pub fn validate_pagination(args: &PaginationArgs) -> Result<(), String> {
    if args.max_scrolls == 0 {
        return Err("max_scrolls must be at least 1".to_string());
    }
    if args.stall_threshold == 0 {
        return Err("stall_threshold must be at least 1".to_string());
    }
    if args.scroll_increment <= 0 {
        return Err(format!(
            "scroll_increment must be positive, got {}",
            args.scroll_increment
        ));
    }
    Ok(())
}

/// Validate that a base URL parses and uses http(s)
fn validate_base_url(name: &str, value: &str) -> Result<(), String> {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        Ok(parsed) => Err(format!(
            "{} must use http or https, got scheme '{}'",
            name,
            parsed.scheme()
        )),
        Err(e) => Err(format!("{} is not a valid URL ('{}'): {}", name, value, e)),
    }
}

/// Checks that only make sense after clap has merged arguments and environment
pub fn validate_settings(settings: &AppSettings) -> Result<(), String> {
    validate_base_url("site_url", &settings.browser.site_url)?;

    match &settings.command {
        Command::Search(args) => validate_pagination(&args.pagination)?,
        Command::Comments(args) => validate_pagination(&args.pagination)?,
        Command::Detect(_) => {
            validate_base_url("openai_custom_url", &settings.openai.openai_custom_url)?;
            if settings
                .openai
                .openai_api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
            {
                return Err(
                    "detect needs an API key; set NOTECRAWL_OPENAI_API_KEY".to_string(),
                );
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn load_config() -> anyhow::Result<AppSettings> {
    // Parse command line arguments and environment variables
    let mut app_settings = AppSettings::parse();

    // DashScope keys are commonly exported under their own name
    if app_settings.openai.openai_api_key.is_none() {
        app_settings.openai.openai_api_key = env::var("DASHSCOPE_API_KEY").ok();
    }

    validate_settings(&app_settings).map_err(|e| anyhow::anyhow!(e))?;

    Ok(app_settings)
}
