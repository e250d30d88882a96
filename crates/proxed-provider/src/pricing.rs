use proxed_common::Provider;

/// Request cost, fixed-precision decimal strings (6 places) suitable for
/// storage without floating-point drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cost {
    pub prompt_cost: String,
    pub completion_cost: String,
    pub total_cost: String,
}

/// USD per million tokens, held as integer micro-USD.
#[derive(Debug, Clone, Copy)]
struct Rate {
    prompt_micros_per_million: u64,
    completion_micros_per_million: u64,
}

const fn rate(prompt_micros: u64, completion_micros: u64) -> Rate {
    Rate {
        prompt_micros_per_million: prompt_micros,
        completion_micros_per_million: completion_micros,
    }
}

/// Longest prefixes first so e.g. `gpt-4o-mini` never matches the `gpt-4o`
/// tier.
const OPENAI_RATES: &[(&str, Rate)] = &[
    ("gpt-4.1-mini", rate(400_000, 1_600_000)),
    ("gpt-4.1-nano", rate(100_000, 400_000)),
    ("gpt-4.1", rate(2_000_000, 8_000_000)),
    ("gpt-4o-mini", rate(150_000, 600_000)),
    ("gpt-4o", rate(2_500_000, 10_000_000)),
    ("o4-mini", rate(1_100_000, 4_400_000)),
    ("o3", rate(2_000_000, 8_000_000)),
];

const ANTHROPIC_RATES: &[(&str, Rate)] = &[
    ("claude-3-5-haiku", rate(800_000, 4_000_000)),
    ("claude-3-5-sonnet", rate(3_000_000, 15_000_000)),
    ("claude-3-7-sonnet", rate(3_000_000, 15_000_000)),
    ("claude-3-haiku", rate(250_000, 1_250_000)),
    ("claude-3-opus", rate(15_000_000, 75_000_000)),
    ("claude-sonnet-4", rate(3_000_000, 15_000_000)),
    ("claude-opus-4", rate(15_000_000, 75_000_000)),
];

const GOOGLE_RATES: &[(&str, Rate)] = &[
    ("gemini-1.5-flash", rate(75_000, 300_000)),
    ("gemini-1.5-pro", rate(1_250_000, 5_000_000)),
    ("gemini-2.0-flash", rate(100_000, 400_000)),
    ("gemini-2.5-flash", rate(300_000, 2_500_000)),
    ("gemini-2.5-pro", rate(1_250_000, 10_000_000)),
];

/// Documented default tier per provider, used when the model is unknown.
fn default_rate(provider: Provider) -> Rate {
    match provider {
        Provider::OpenAi => rate(2_500_000, 10_000_000),
        Provider::Anthropic => rate(3_000_000, 15_000_000),
        Provider::Google => rate(100_000, 400_000),
    }
}

fn resolve_rate(provider: Provider, model: &str) -> Rate {
    let table = match provider {
        Provider::OpenAi => OPENAI_RATES,
        Provider::Anthropic => ANTHROPIC_RATES,
        Provider::Google => GOOGLE_RATES,
    };
    table
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, rate)| *rate)
        .unwrap_or_else(|| default_rate(provider))
}

/// Pure cost calculation over integer micro-USD; `total_cost` is exactly the
/// sum of the two parts.
pub fn calculate_cost(
    provider: Provider,
    model: &str,
    prompt_tokens: i64,
    completion_tokens: i64,
) -> Cost {
    let rate = resolve_rate(provider, model);
    let prompt_micros = token_cost_micros(prompt_tokens, rate.prompt_micros_per_million);
    let completion_micros =
        token_cost_micros(completion_tokens, rate.completion_micros_per_million);
    Cost {
        prompt_cost: format_micros(prompt_micros),
        completion_cost: format_micros(completion_micros),
        total_cost: format_micros(prompt_micros + completion_micros),
    }
}

fn token_cost_micros(tokens: i64, micros_per_million: u64) -> u128 {
    let tokens = tokens.max(0) as u128;
    // Round half up at the micro-USD boundary.
    (tokens * micros_per_million as u128 + 500_000) / 1_000_000
}

fn format_micros(micros: u128) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}
