// Token savings accounting. Four categories: intermediate results that
// never entered context, the context re-sent on every conventional round
// trip, per-call protocol overhead, and the model generations spent
// deciding each next call. The constants are calibration parameters.

use codecall_bridge::ToolCallRecord;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct SavingsConfig {
    /// Estimated tokens of system prompt, tool schemas, and history that a
    /// conventional loop re-sends on every round trip.
    pub base_context_tokens: u64,
    /// Tokens of tool-use scaffolding per call.
    pub tool_call_overhead: u64,
    /// Output tokens the model spends deciding one follow-up call.
    pub llm_decision_tokens: u64,
    /// Estimate for results whose size is unknown (errored calls).
    pub unknown_result_estimate: u64,
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            base_context_tokens: 7_000,
            tool_call_overhead: 40,
            llm_decision_tokens: 80,
            unknown_result_estimate: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSavingsBreakdown {
    pub intermediate_results: u64,
    pub round_trip_context: u64,
    pub tool_call_overhead: u64,
    pub llm_decisions: u64,
}

impl TokenSavingsBreakdown {
    pub fn total(&self) -> u64 {
        self.intermediate_results
            + self.round_trip_context
            + self.tool_call_overhead
            + self.llm_decisions
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSavings {
    pub total: u64,
    pub breakdown: TokenSavingsBreakdown,
    pub explanation: String,
}

/// Rough serialized-size estimate, one token per four JSON characters.
pub fn estimate_tokens(value: &Value) -> u64 {
    let length = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
    (length as u64).div_ceil(4)
}

pub fn compute_savings(records: &[ToolCallRecord], config: &SavingsConfig) -> TokenSavings {
    let n = records.len() as u64;
    if n <= 1 {
        return TokenSavings {
            total: 0,
            breakdown: TokenSavingsBreakdown::default(),
            explanation: "No savings (single tool call)".to_string(),
        };
    }

    let sizes: Vec<u64> = records
        .iter()
        .map(|r| {
            r.result
                .as_ref()
                .map(estimate_tokens)
                .unwrap_or(config.unknown_result_estimate)
        })
        .collect();

    let intermediate_results: u64 = sizes.iter().sum();

    // One round trip is avoided per call after the first; each would have
    // re-sent the base context plus every prior result.
    let mut round_trip_context = 0u64;
    let mut prior_results = 0u64;
    for size in sizes.iter().take(sizes.len() - 1) {
        prior_results += size;
        round_trip_context += config.base_context_tokens + prior_results;
    }

    let breakdown = TokenSavingsBreakdown {
        intermediate_results,
        round_trip_context,
        tool_call_overhead: config.tool_call_overhead * n,
        llm_decisions: config.llm_decision_tokens * (n - 1),
    };
    let total = breakdown.total();

    let local = records.iter().filter(|r| !r.is_mcp).count();
    let mcp = records.len() - local;
    let explanation = format!(
        "Saved ~{total} tokens across {n} tool calls ({local} local, {mcp} MCP): \
         {} intermediate results, {} round-trip context, {} call overhead, {} model decisions",
        breakdown.intermediate_results,
        breakdown.round_trip_context,
        breakdown.tool_call_overhead,
        breakdown.llm_decisions,
    );

    TokenSavings {
        total,
        breakdown,
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, is_mcp: bool, result: Option<Value>) -> ToolCallRecord {
        let mut record = ToolCallRecord::begin(name, json!({}), is_mcp);
        record.result = result;
        if record.result.is_none() {
            record.error = Some("failed".to_string());
        }
        record
    }

    #[test]
    fn single_call_saves_nothing() {
        let records = vec![record("getUser", false, Some(json!({"id": "1"})))];
        let savings = compute_savings(&records, &SavingsConfig::default());
        assert_eq!(savings.total, 0);
        assert_eq!(savings.breakdown, TokenSavingsBreakdown::default());
        assert_eq!(savings.explanation, "No savings (single tool call)");

        let empty = compute_savings(&[], &SavingsConfig::default());
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn breakdown_sums_to_total() {
        let records = vec![
            record("getUser", false, Some(json!({"id": "1", "score": 10}))),
            record("getUser", false, Some(json!({"id": "2", "score": 20}))),
            record("mcp_scrape", true, None),
            record("average", false, Some(json!({"avg": 15.0}))),
        ];
        let savings = compute_savings(&records, &SavingsConfig::default());
        assert_eq!(savings.breakdown.total(), savings.total);
        assert!(savings.total > 0);
        assert!(savings.explanation.contains("3 local, 1 MCP"));
    }

    #[test]
    fn round_trip_context_accumulates_prior_results() {
        let config = SavingsConfig {
            base_context_tokens: 100,
            tool_call_overhead: 0,
            llm_decision_tokens: 0,
            unknown_result_estimate: 50,
        };
        // Two calls, first result 8 chars -> 2 tokens.
        let records = vec![
            record("a", false, Some(json!([1, 2, 3]))),
            record("b", false, Some(json!(null))),
        ];
        let first_size = estimate_tokens(&json!([1, 2, 3]));
        let savings = compute_savings(&records, &config);
        assert_eq!(savings.breakdown.round_trip_context, 100 + first_size);
    }

    #[test]
    fn errored_calls_use_the_unknown_estimate() {
        let config = SavingsConfig {
            base_context_tokens: 0,
            tool_call_overhead: 0,
            llm_decision_tokens: 0,
            unknown_result_estimate: 50,
        };
        let records = vec![record("a", false, None), record("b", false, None)];
        let savings = compute_savings(&records, &config);
        assert_eq!(savings.breakdown.intermediate_results, 100);
        assert_eq!(savings.breakdown.round_trip_context, 50);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(&json!("abc")), 2); // "abc" -> 5 chars
        assert_eq!(estimate_tokens(&json!(null)), 1); // 4 chars
        assert_eq!(estimate_tokens(&json!({})), 1); // 2 chars
    }
}
