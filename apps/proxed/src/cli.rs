use clap::Parser;

#[derive(Parser)]
#[command(name = "proxed")]
pub(crate) struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8788)]
    pub(crate) port: u16,
    /// Path to a JSON file with projects, key fragments and team limits.
    #[arg(long, default_value = "")]
    pub(crate) seed: String,
    /// Override for the OpenAI base URL, mainly for local stubs.
    #[arg(long)]
    pub(crate) openai_base_url: Option<String>,
    #[arg(long)]
    pub(crate) anthropic_base_url: Option<String>,
    #[arg(long)]
    pub(crate) google_base_url: Option<String>,
}
