use std::fmt;

/// Every block action id the system emits, as a closed set. Anything
/// else parses to `Unknown` and is rejected with a typed error rather
/// than falling through to a generic handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionId {
    SymbolInput,
    QuantityInput,
    NotionalInput,
    SideSelect,
    OrderTypeSelect,
    LimitPriceInput,
    EntryPriceInput,
    ConfirmTokenInput,
    AnalyzeRisk,
    AlertPause,
    AlertResume,
    AlertDelete,
    Unknown(String),
}

impl ActionId {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "trade_symbol_input" => ActionId::SymbolInput,
            "trade_quantity_input" => ActionId::QuantityInput,
            "trade_notional_input" => ActionId::NotionalInput,
            "trade_side_select" => ActionId::SideSelect,
            "trade_order_type_select" => ActionId::OrderTypeSelect,
            "trade_limit_price_input" => ActionId::LimitPriceInput,
            "trade_entry_price_input" => ActionId::EntryPriceInput,
            "trade_confirm_token_input" => ActionId::ConfirmTokenInput,
            "trade_analyze_risk" => ActionId::AnalyzeRisk,
            "alert_pause" => ActionId::AlertPause,
            "alert_resume" => ActionId::AlertResume,
            "alert_delete" => ActionId::AlertDelete,
            other => ActionId::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionId::SymbolInput => "trade_symbol_input",
            ActionId::QuantityInput => "trade_quantity_input",
            ActionId::NotionalInput => "trade_notional_input",
            ActionId::SideSelect => "trade_side_select",
            ActionId::OrderTypeSelect => "trade_order_type_select",
            ActionId::LimitPriceInput => "trade_limit_price_input",
            ActionId::EntryPriceInput => "trade_entry_price_input",
            ActionId::ConfirmTokenInput => "trade_confirm_token_input",
            ActionId::AnalyzeRisk => "trade_analyze_risk",
            ActionId::AlertPause => "alert_pause",
            ActionId::AlertResume => "alert_resume",
            ActionId::AlertDelete => "alert_delete",
            ActionId::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_ids_roundtrip() {
        for id in [
            ActionId::SymbolInput,
            ActionId::QuantityInput,
            ActionId::NotionalInput,
            ActionId::SideSelect,
            ActionId::OrderTypeSelect,
            ActionId::LimitPriceInput,
            ActionId::EntryPriceInput,
            ActionId::ConfirmTokenInput,
            ActionId::AnalyzeRisk,
            ActionId::AlertPause,
            ActionId::AlertResume,
            ActionId::AlertDelete,
        ] {
            assert_eq!(ActionId::parse(id.as_str()), id);
        }
    }

    #[test]
    fn test_unknown_is_preserved_not_dropped() {
        let parsed = ActionId::parse("legacy_handler_glob");
        assert_eq!(parsed, ActionId::Unknown("legacy_handler_glob".to_string()));
        assert_eq!(parsed.as_str(), "legacy_handler_glob");
    }
}
