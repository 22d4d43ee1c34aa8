use bank_sync_common::{CurrencyCode, MinorUnits};

use crate::{
    db_types::{MatchSuggestion, MatchTier, Order, OrderStatus, TransactionRecord},
    helpers::{name_similarity, normalize_reference},
    matcher::{InvoiceReference, ReferencePatterns},
};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Auto-match when the only evidence is a single Medium candidate
    pub auto_match_medium: bool,
    /// Auto-match a transaction that pays only part of what its order owes
    pub auto_match_partial: bool,
    /// Minimum payer-name similarity for a same-amount order to count as Low evidence
    pub name_similarity_threshold: f64,
    pub max_suggestions: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { auto_match_medium: false, auto_match_partial: true, name_similarity_threshold: 0.5, max_suggestions: 10 }
    }
}

/// The parts of a bank transaction the matcher looks at.
#[derive(Debug, Clone)]
pub struct MatchInput {
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub reference: String,
    pub payer_name: Option<String>,
}

impl From<&TransactionRecord> for MatchInput {
    fn from(tx: &TransactionRecord) -> Self {
        Self {
            amount: tx.amount,
            currency: tx.currency.clone(),
            reference: tx.remittance.clone(),
            payer_name: tx.payer_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResolution {
    AutoMatch(MatchSuggestion),
    /// Several orders have High evidence. `covers_amount` is true when their outstanding amounts add up to exactly
    /// the transaction amount, which makes the transaction a candidate for a manual split.
    Ambiguous { suggestions: Vec<MatchSuggestion>, covers_amount: bool },
    NeedsReview(Vec<MatchSuggestion>),
    /// The evidence is strong enough to auto-match, but the transaction is for more than the order owes
    Overpayment(MatchSuggestion),
    NoMatch,
}

impl MatchResolution {
    pub fn suggestions(&self) -> Vec<MatchSuggestion> {
        match self {
            Self::AutoMatch(s) | Self::Overpayment(s) => vec![s.clone()],
            Self::Ambiguous { suggestions, .. } | Self::NeedsReview(suggestions) => suggestions.clone(),
            Self::NoMatch => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionMatcher {
    patterns: ReferencePatterns,
    config: MatcherConfig,
}

impl TransactionMatcher {
    pub fn new(patterns: ReferencePatterns, config: MatcherConfig) -> Self {
        Self { patterns, config }
    }

    pub fn patterns(&self) -> &ReferencePatterns {
        &self.patterns
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Evaluates the transaction against `orders`. Orders in another currency are ignored, as are orders that are not
    /// awaiting payment.
    pub fn evaluate(&self, input: &MatchInput, orders: &[Order]) -> MatchResolution {
        let candidates = orders
            .iter()
            .filter(|o| o.currency == input.currency && o.status == OrderStatus::AwaitingPayment)
            .collect::<Vec<_>>();
        if candidates.is_empty() || input.amount.is_negative() || input.amount.is_zero() {
            return MatchResolution::NoMatch;
        }
        let evidence = ReferenceEvidence::collect(&self.patterns, &input.reference);
        let mut suggestions = candidates
            .iter()
            .filter_map(|order| self.code_evidence(&evidence, order).map(|(tier, why)| suggest(order, input, tier, why)))
            .collect::<Vec<_>>();
        if suggestions.is_empty() {
            suggestions = self.amount_evidence(input, &candidates);
        }
        self.resolve(input, suggestions)
    }

    fn resolve(&self, input: &MatchInput, mut suggestions: Vec<MatchSuggestion>) -> MatchResolution {
        if suggestions.is_empty() {
            return MatchResolution::NoMatch;
        }
        suggestions.sort_by(|a, b| {
            b.tier.cmp(&a.tier).then(b.amount_matches.cmp(&a.amount_matches)).then(a.order_id.cmp(&b.order_id))
        });
        let high = suggestions.iter().filter(|s| s.tier == MatchTier::High).collect::<Vec<_>>();
        match high.len() {
            1 => return self.auto_match(input, high[0].clone(), suggestions),
            n if n > 1 => {
                let outstanding = high.iter().map(|s| s.outstanding).sum::<MinorUnits>();
                let covers_amount = outstanding == input.amount;
                suggestions.truncate(self.config.max_suggestions);
                return MatchResolution::Ambiguous { suggestions, covers_amount };
            },
            _ => {},
        }
        let medium = suggestions.iter().filter(|s| s.tier == MatchTier::Medium).count();
        if self.config.auto_match_medium && medium == 1 && suggestions[0].tier == MatchTier::Medium {
            let candidate = suggestions[0].clone();
            return self.auto_match(input, candidate, suggestions);
        }
        suggestions.truncate(self.config.max_suggestions);
        MatchResolution::NeedsReview(suggestions)
    }

    /// Paying more than the order owes always needs a person. Paying less is a part payment.
    fn auto_match(
        &self,
        input: &MatchInput,
        candidate: MatchSuggestion,
        mut suggestions: Vec<MatchSuggestion>,
    ) -> MatchResolution {
        if input.amount > candidate.outstanding {
            return MatchResolution::Overpayment(candidate);
        }
        if input.amount < candidate.outstanding && !self.config.auto_match_partial {
            suggestions.truncate(self.config.max_suggestions);
            return MatchResolution::NeedsReview(suggestions);
        }
        MatchResolution::AutoMatch(candidate)
    }

    /// The strongest code or invoice evidence for the order in the reference text.
    fn code_evidence(&self, evidence: &ReferenceEvidence, order: &Order) -> Option<(MatchTier, String)> {
        let code = order.code.as_str();
        if evidence.codes.iter().any(|c| c == code) || evidence.has_word(code) {
            return Some((MatchTier::High, format!("order code {code} in reference")));
        }
        if let Some(invoice) = order.invoice_numbers.iter().find(|inv| evidence.has_word_sequence(inv)) {
            return Some((MatchTier::High, format!("invoice number {invoice} in reference")));
        }
        let normalized_code = normalize_reference(code);
        if evidence.codes.iter().any(|c| c.eq_ignore_ascii_case(code)) ||
            (!normalized_code.is_empty() && evidence.normalized.contains(&normalized_code))
        {
            return Some((MatchTier::Medium, format!("order code {code} found ignoring case and separators")));
        }
        let invoice = order.invoice_numbers.iter().find(|inv| {
            self.patterns
                .parse_invoice(inv)
                .map(|own| evidence.invoices.iter().any(|found| found.same_invoice(&own)))
                .unwrap_or(false)
        });
        invoice.map(|inv| (MatchTier::Medium, format!("invoice number {inv} found ignoring separators")))
    }

    /// Low evidence, only used when no order has code evidence at all.
    fn amount_evidence(&self, input: &MatchInput, candidates: &[&Order]) -> Vec<MatchSuggestion> {
        let same_amount = candidates.iter().filter(|o| o.pending == input.amount).collect::<Vec<_>>();
        match same_amount.len() {
            0 => vec![],
            1 => vec![suggest(same_amount[0], input, MatchTier::Low, "only open order with this amount".into())],
            _ => {
                let payer = match input.payer_name.as_deref() {
                    Some(p) if !p.trim().is_empty() => p,
                    _ => return vec![],
                };
                same_amount
                    .into_iter()
                    .filter_map(|o| {
                        let name = o.customer_name.as_deref()?;
                        let score = name_similarity(payer, name);
                        (score >= self.config.name_similarity_threshold).then(|| {
                            let why = format!("same amount, payer name resembles {name} ({:.0}%)", score * 100.0);
                            suggest(o, input, MatchTier::Low, why)
                        })
                    })
                    .collect()
            },
        }
    }
}

fn suggest(order: &Order, input: &MatchInput, tier: MatchTier, evidence: String) -> MatchSuggestion {
    MatchSuggestion {
        order_id: order.id,
        order_code: order.code.clone(),
        tier,
        evidence,
        outstanding: order.pending,
        amount_matches: order.pending == input.amount,
    }
}

/// Everything pulled out of one reference text, computed once per transaction.
struct ReferenceEvidence {
    codes: Vec<String>,
    invoices: Vec<InvoiceReference>,
    words: Vec<String>,
    normalized: String,
}

impl ReferenceEvidence {
    fn collect(patterns: &ReferencePatterns, text: &str) -> Self {
        Self {
            codes: patterns.order_codes(text),
            invoices: patterns.invoice_references(text),
            words: text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(String::from).collect(),
            normalized: normalize_reference(text),
        }
    }

    /// Case-sensitive whole word
    fn has_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }

    /// The words of `phrase` appear consecutively and with the same case, e.g. `INV-0042` in `re: INV 0042`.
    fn has_word_sequence(&self, phrase: &str) -> bool {
        let needle = phrase.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect::<Vec<_>>();
        if needle.is_empty() || needle.len() > self.words.len() {
            return false;
        }
        self.words.windows(needle.len()).any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;

    fn eur() -> CurrencyCode {
        "EUR".parse().unwrap()
    }

    fn order(id: i64, code: &str, pending: i64) -> Order {
        Order {
            id,
            organizer: "org".into(),
            event: "fest".into(),
            code: code.into(),
            currency: eur(),
            total: MinorUnits::from(pending),
            pending: MinorUnits::from(pending),
            status: OrderStatus::AwaitingPayment,
            customer_name: None,
            invoice_numbers: vec![],
            created_at: Utc::now(),
        }
    }

    fn input(amount: i64, reference: &str) -> MatchInput {
        MatchInput { amount: MinorUnits::from(amount), currency: eur(), reference: reference.into(), payer_name: None }
    }

    fn matcher() -> TransactionMatcher {
        TransactionMatcher::new(ReferencePatterns::with_default_order_code(&["INV"]).unwrap(), MatcherConfig::default())
    }

    #[test]
    fn verbatim_code_is_auto_matched() {
        let orders = vec![order(1, "AB12CD", 5000), order(2, "ZZ99YY", 5000)];
        match matcher().evaluate(&input(5000, "Payment for ORDER-AB12CD"), &orders) {
            MatchResolution::AutoMatch(s) => {
                assert_eq!(s.order_code, "AB12CD");
                assert_eq!(s.tier, MatchTier::High);
                assert!(s.amount_matches);
            },
            r => panic!("Expected an auto-match, got {r:?}"),
        }
    }

    #[test]
    fn auto_match_depends_on_the_amount() {
        let orders = vec![order(1, "AB12CD", 5000)];
        match matcher().evaluate(&input(2000, "AB12CD first instalment"), &orders) {
            MatchResolution::AutoMatch(s) => assert!(!s.amount_matches),
            r => panic!("Expected a part payment to auto-match, got {r:?}"),
        }
        match matcher().evaluate(&input(6000, "AB12CD"), &orders) {
            MatchResolution::Overpayment(s) => assert_eq!(s.order_code, "AB12CD"),
            r => panic!("Expected an overpayment, got {r:?}"),
        }
        let strict = TransactionMatcher::new(
            ReferencePatterns::with_default_order_code::<&str>(&[]).unwrap(),
            MatcherConfig { auto_match_partial: false, ..Default::default() },
        );
        assert!(matches!(strict.evaluate(&input(2000, "AB12CD"), &orders), MatchResolution::NeedsReview(_)));
        assert!(matches!(strict.evaluate(&input(5000, "AB12CD"), &orders), MatchResolution::AutoMatch(_)));
    }

    #[test]
    fn currency_mismatch_is_never_a_candidate() {
        let orders = vec![order(1, "AB12CD", 5000)];
        let mut usd = input(5000, "ORDER-AB12CD");
        usd.currency = "USD".parse().unwrap();
        assert_eq!(matcher().evaluate(&usd, &orders), MatchResolution::NoMatch);
    }

    #[test]
    fn two_codes_are_ambiguous() {
        let orders = vec![order(1, "AB12CD", 2000), order(2, "XY34EF", 3000)];
        match matcher().evaluate(&input(5000, "AB12CD XY34EF"), &orders) {
            MatchResolution::Ambiguous { suggestions, covers_amount } => {
                assert_eq!(suggestions.len(), 2);
                assert!(covers_amount);
            },
            r => panic!("Expected ambiguous, got {r:?}"),
        }
        match matcher().evaluate(&input(4000, "AB12CD XY34EF"), &orders) {
            MatchResolution::Ambiguous { covers_amount, .. } => assert!(!covers_amount),
            r => panic!("Expected ambiguous, got {r:?}"),
        }
    }

    #[test]
    fn case_and_separator_differences_need_review() {
        let orders = vec![order(1, "AB12CD", 5000)];
        let m = matcher();
        for reference in ["order ab12cd", "AB 12 CD", "ab-12-cd"] {
            match m.evaluate(&input(5000, reference), &orders) {
                MatchResolution::NeedsReview(s) => assert_eq!(s[0].tier, MatchTier::Medium, "{reference}"),
                r => panic!("Expected review for {reference}, got {r:?}"),
            }
        }
        let eager = TransactionMatcher::new(
            ReferencePatterns::with_default_order_code::<&str>(&[]).unwrap(),
            MatcherConfig { auto_match_medium: true, ..Default::default() },
        );
        assert!(matches!(eager.evaluate(&input(5000, "order ab12cd"), &orders), MatchResolution::AutoMatch(_)));
    }

    #[test]
    fn invoice_numbers() {
        let mut o = order(1, "AB12CD", 5000);
        o.invoice_numbers = vec!["INV-0042".into()];
        let orders = vec![o];
        match matcher().evaluate(&input(5000, "Re: INV-0042"), &orders) {
            MatchResolution::AutoMatch(s) => assert!(s.evidence.contains("INV-0042")),
            r => panic!("Expected an auto-match, got {r:?}"),
        }
        match matcher().evaluate(&input(5000, "Re: inv 42"), &orders) {
            MatchResolution::NeedsReview(s) => assert_eq!(s[0].tier, MatchTier::Medium),
            r => panic!("Expected review, got {r:?}"),
        }
    }

    #[test]
    fn unique_amount_is_low_evidence() {
        let orders = vec![order(1, "AB12CD", 5000), order(2, "XY34EF", 7000)];
        match matcher().evaluate(&input(7000, "tickets"), &orders) {
            MatchResolution::NeedsReview(s) => {
                assert_eq!(s.len(), 1);
                assert_eq!(s[0].order_code, "XY34EF");
                assert_eq!(s[0].tier, MatchTier::Low);
            },
            r => panic!("Expected review, got {r:?}"),
        }
        assert_eq!(matcher().evaluate(&input(1234, "tickets"), &orders), MatchResolution::NoMatch);
    }

    #[test]
    fn payer_name_breaks_amount_ties() {
        let mut a = order(1, "AB12CD", 5000);
        a.customer_name = Some("Jane Doe".into());
        let mut b = order(2, "XY34EF", 5000);
        b.customer_name = Some("John Smith".into());
        let orders = vec![a, b];
        let mut tx = input(5000, "tickets");
        assert_eq!(matcher().evaluate(&tx, &orders), MatchResolution::NoMatch);
        tx.payer_name = Some("DOE JANE".into());
        match matcher().evaluate(&tx, &orders) {
            MatchResolution::NeedsReview(s) => {
                assert_eq!(s.len(), 1);
                assert_eq!(s[0].order_code, "AB12CD");
            },
            r => panic!("Expected review, got {r:?}"),
        }
    }

    #[test]
    fn outgoing_and_zero_amounts_never_match() {
        let orders = vec![order(1, "AB12CD", 5000)];
        assert_eq!(matcher().evaluate(&input(-5000, "AB12CD"), &orders), MatchResolution::NoMatch);
        assert_eq!(matcher().evaluate(&input(0, "AB12CD"), &orders), MatchResolution::NoMatch);
    }

    #[test]
    fn suggestions_are_capped() {
        let orders = (0..15).map(|i| order(i, &format!("CODE{i:02}"), 5000)).collect::<Vec<_>>();
        let reference = orders.iter().map(|o| o.code.to_lowercase()).collect::<Vec<_>>().join(" ");
        match matcher().evaluate(&input(5000, &reference), &orders) {
            MatchResolution::NeedsReview(s) => assert_eq!(s.len(), 10),
            r => panic!("Expected review, got {r:?}"),
        }
    }
}
