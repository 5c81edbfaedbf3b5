//! Per-token pricing for the models the classifier stages use.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) USD cost per token for a model name.
///
/// Matches on model family prefix; unknown models cost zero so the audit
/// trail never over-reports.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-4o-mini") {
        (dec!(0.00000015), dec!(0.0000006))
    } else if m.starts_with("gpt-4o") {
        (dec!(0.0000025), dec!(0.00001))
    } else if m.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if m.contains("sonnet") {
        (dec!(0.000003), dec!(0.000015))
    } else if m.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    }
}

/// Total cost of one call at the given (input, output) per-token rates.
pub fn call_cost(rates: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    let (input, output) = rates;
    input * Decimal::from(input_tokens) + output * Decimal::from(output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_cheaper_than_full() {
        let (mini_in, _) = model_cost("gpt-4o-mini");
        let (full_in, _) = model_cost("gpt-4o");
        assert!(mini_in < full_in);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(call_cost(model_cost("mystery-model"), 1000, 1000), Decimal::ZERO);
    }

    #[test]
    fn call_cost_sums_both_directions() {
        let cost = call_cost(model_cost("claude-sonnet-4-20250514"), 1000, 100);
        assert_eq!(cost, dec!(0.0045));
    }
}
