use crate::error::{CalcError, CalcResult};
use crate::types::*;
use bigdecimal::BigDecimal;
use common_money::round_q7;
use std::str::FromStr;

pub struct TaxResult {
    pub retail_tax_q7: BigDecimal,
    pub use_tax_q7: Option<BigDecimal>,
    pub sub_taxes: Vec<SubTax>,
}

/// Compute retail tax (flat rate or per-jurisdiction) and, in `USE_TAX` /
/// `MIXED` mode, use tax on the cost basis of vendor-uncollected items.
pub fn compute_tax(input: &FrozenInput, taxable_base: &BigDecimal) -> CalcResult<TaxResult> {
    let mut retail_tax_q7 = BigDecimal::from(0);
    let mut sub_taxes = Vec::new();

    if matches!(input.config.mode, TaxMode::Retail | TaxMode::Mixed) {
        if input.config.jurisdictions.is_empty() {
            let rate = parse_rate(input.config.retail_rate.as_deref(), "retailRate")?;
            retail_tax_q7 = round_q7(&(taxable_base * &rate));
        } else {
            let mut jurisdictions = input.config.jurisdictions.clone();
            jurisdictions.sort_by(|a, b| a.order.cmp(&b.order).then(a.code.cmp(&b.code)));
            for j in &jurisdictions {
                let rate = BigDecimal::from_str(&j.rate)
                    .map_err(|_| CalcError::InvalidInput(vec![format!("bad jurisdiction rate for {}", j.code)]))?;
                let amount = round_q7(&(taxable_base * &rate));
                retail_tax_q7 += &amount;
                sub_taxes.push(SubTax {
                    jurisdiction_code: j.code.clone(),
                    amount_q7: amount,
                });
            }
        }
    }

    let use_tax_q7 = if matches!(input.config.mode, TaxMode::UseTax | TaxMode::Mixed) {
        let rate = parse_rate(input.config.use_tax_rate.as_deref(), "useTaxRate")?;
        let use_tax_base: BigDecimal = input
            .line_items
            .iter()
            .filter(|li| li.use_tax_eligible && !li.vendor_tax_collected)
            .map(|li| round_q7(&(&li.cost * BigDecimal::from(li.quantity))))
            .fold(BigDecimal::from(0), |acc, v| acc + v);
        Some(round_q7(&(&use_tax_base * &rate)))
    } else {
        None
    };

    Ok(TaxResult {
        retail_tax_q7,
        use_tax_q7,
        sub_taxes,
    })
}

fn parse_rate(raw: Option<&str>, field: &str) -> CalcResult<BigDecimal> {
    let raw = raw.ok_or_else(|| CalcError::InvalidInput(vec![format!("{field} is required for the configured tax mode")]))?;
    BigDecimal::from_str(raw).map_err(|_| CalcError::InvalidInput(vec![format!("{field} is not a finite decimal")]))
}
