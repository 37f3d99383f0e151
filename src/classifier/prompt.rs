//! 判定プロンプトと応答スキーマ

use serde_json::{json, Value};

use crate::config::InclusionMode;
use crate::types::RawCandidate;

/// structured output のスキーマ名
pub const SCHEMA_NAME: &str = "Decision";

/// `{include: bool, industry_short: string}` 以外を許さないスキーマ
pub fn decision_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "include": { "type": "boolean" },
            "industry_short": { "type": "string" }
        },
        "required": ["include", "industry_short"],
        "additionalProperties": false
    })
}

pub fn system_prompt(mode: InclusionMode) -> String {
    let mode_line = match mode {
        InclusionMode::Balanced => "STRICTNESS MODE: BALANCED (favor precision over recall).",
        InclusionMode::Strict => "STRICTNESS MODE: STRICT (be as conservative as possible).",
    };
    format!(
        "You are an associate at a search fund screening acquisition prospects.\n\
         Reply with STRICT JSON ONLY, matching the schema. Decide whether the company should be \
         INCLUDED in the pipeline and give a 3-5 word industry tag.\n\
         \n\
         INCLUSION RULES:\n\
         - Include when the company matches the thesis positive_signals.\n\
         - When unclear, include ONLY if it looks like a real commercial business \
         (its own website with product or service pages).\n\
         - Exclude associations, events and conferences, government programs and non-profits, \
         unless there is a clear fee-for-service line at SMB scale.\n\
         - Exclude consumer fads without defensibility, crypto, adult content and gambling.\n\
         INDUSTRY TAG: short and concrete (for example 'HVAC services', 'Compliance testing').\n\
         \n\
         {mode_line}\n"
    )
}

pub fn user_prompt(thesis: &Value, candidate: &RawCandidate) -> String {
    let thesis_text = serde_json::to_string_pretty(thesis).unwrap_or_else(|_| "{}".to_string());
    let industry = match candidate.industry_text.trim() {
        "" => "(not listed)",
        text => text,
    };
    format!(
        "THESIS:\n{thesis_text}\n\n\
         TASK:\n\
         Respond EXACTLY as JSON: {{\"include\": <bool>, \"industry_short\": <str>}}.\n\
         COMPANY:\n\
         Name: {name}\n\
         Industry (as listed): {industry}\n\
         Website: {website}\n\
         NOTES:\n\
         - Include only genuine commercial entities; exclude associations and events \
         unless substantial fee-for-service work is evident.\n",
        name = candidate.name.trim(),
        website = candidate.website.trim(),
    )
}
