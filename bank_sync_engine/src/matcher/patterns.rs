use regex::{Regex, RegexBuilder};

use crate::helpers::strip_leading_zeros;

/// An optional event-slug prefix, then a 5 or 6 character alphanumeric code. The code is the first capture group.
pub const DEFAULT_ORDER_CODE_PATTERN: &str = r"\b(?:[A-Z0-9]+-)?([A-Z0-9]{5,6})\b";

/// An invoice number found in free text, e.g. `INV 0042` for the prefix `INV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReference {
    /// The configured prefix, uppercased
    pub prefix: String,
    /// The digits, without leading zeros
    pub number: String,
    /// The text exactly as it was matched
    pub raw: String,
}

impl InvoiceReference {
    pub fn same_invoice(&self, other: &InvoiceReference) -> bool {
        self.prefix == other.prefix && self.number == other.number
    }
}

/// The configurable patterns used to pull order codes and invoice numbers out of remittance text.
#[derive(Debug, Clone)]
pub struct ReferencePatterns {
    order_code: Regex,
    invoices: Vec<(String, Regex)>,
}

impl ReferencePatterns {
    /// Order code patterns are matched case-insensitively. If the pattern has a capture group, the first group is
    /// the code, otherwise the whole match is. Every invoice prefix `P` gives the pattern `P[- ]*0*NUMBER`.
    pub fn new<S: AsRef<str>>(order_code_pattern: &str, invoice_prefixes: &[S]) -> Result<Self, regex::Error> {
        let order_code = RegexBuilder::new(order_code_pattern).case_insensitive(true).build()?;
        let invoices = invoice_prefixes
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                let pattern = format!(r"\b({})[- ]*([0-9]+)\b", regex::escape(p));
                RegexBuilder::new(&pattern).case_insensitive(true).build().map(|r| (p.to_uppercase(), r))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { order_code, invoices })
    }

    pub fn with_default_order_code<S: AsRef<str>>(invoice_prefixes: &[S]) -> Result<Self, regex::Error> {
        Self::new(DEFAULT_ORDER_CODE_PATTERN, invoice_prefixes)
    }

    /// Candidate order codes in the text, in order of appearance, with their original case.
    pub fn order_codes(&self, text: &str) -> Vec<String> {
        let mut codes = Vec::new();
        for caps in self.order_code.captures_iter(text) {
            let code = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().to_string());
            if let Some(code) = code {
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
        }
        codes
    }

    /// Invoice numbers in the text for any of the configured prefixes.
    pub fn invoice_references(&self, text: &str) -> Vec<InvoiceReference> {
        self.invoices
            .iter()
            .flat_map(|(prefix, regex)| {
                regex.captures_iter(text).filter_map(|caps| {
                    let raw = caps.get(0)?.as_str().to_string();
                    let number = strip_leading_zeros(caps.get(2)?.as_str()).to_string();
                    Some(InvoiceReference { prefix: prefix.clone(), number, raw })
                })
            })
            .collect()
    }

    /// Parses an order's own invoice number with the configured prefixes. Returns `None` if no prefix fits the whole
    /// string.
    pub fn parse_invoice(&self, invoice_number: &str) -> Option<InvoiceReference> {
        let invoice_number = invoice_number.trim();
        self.invoice_references(invoice_number).into_iter().find(|r| r.raw.len() == invoice_number.len())
    }

    pub fn has_invoice_prefixes(&self) -> bool {
        !self.invoices.is_empty()
    }
}
