//! Field extraction from report document text.
//!
//! The default extractor works on text documents: it scans the lowercased
//! body for the ordered label fragments of each line item and parses the
//! number that follows. Optical character recovery for image-only
//! documents is an external concern; richer extractors plug in behind
//! [`StatementExtractor`].

use crate::models::{BalanceSheetFields, CashFlowFields, IncomeStatementFields};

/// Per-kind field maps extracted from one document; any kind may be empty
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedStatements {
    pub balance_sheet: BalanceSheetFields,
    pub income_statement: IncomeStatementFields,
    pub cash_flow: CashFlowFields,
}

impl ExtractedStatements {
    pub fn is_empty(&self) -> bool {
        self.balance_sheet == BalanceSheetFields::default()
            && self.income_statement == IncomeStatementFields::default()
            && self.cash_flow == CashFlowFields::default()
    }
}

/// Turns raw document bytes into statement field values
pub trait StatementExtractor: Send + Sync {
    fn extract(&self, data: &[u8]) -> ExtractedStatements;
}

/// Label-scanning extractor for text-based documents
#[derive(Debug, Default)]
pub struct TextExtractor;

impl StatementExtractor for TextExtractor {
    fn extract(&self, data: &[u8]) -> ExtractedStatements {
        let text = String::from_utf8_lossy(data).to_lowercase();
        ExtractedStatements {
            balance_sheet: extract_balance_sheet(&text),
            income_statement: extract_income_statement(&text),
            cash_flow: extract_cash_flow(&text),
        }
    }
}

/// Find the ordered label fragments, then parse the first number after
/// the last one. Statement line items are reported as positive
/// magnitudes; zero or negative parses are treated as misses.
fn labeled_value(text: &str, parts: &[&str]) -> Option<f64> {
    let mut pos = 0usize;
    for part in parts {
        let found = text[pos..].find(part)?;
        pos += found + part.len();
    }
    first_number_after(&text[pos..]).filter(|v| *v > 0.0)
}

fn first_number_after(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let token: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let token = token.trim_end_matches(['.', ',']);
    if token.len() < 2 {
        return None;
    }
    parse_number(token)
}

/// Parse a number in Vietnamese or English formatting:
/// "1.234.567,89" and "1,234,567.89" both work.
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim().replace(' ', "");
    if text.is_empty() {
        return None;
    }

    let normalized = if text.contains(',') && text.contains('.') {
        if text.rfind(',') > text.rfind('.') {
            // Vietnamese: dots group thousands, comma is decimal
            text.replace('.', "").replace(',', ".")
        } else {
            text.replace(',', "")
        }
    } else if text.contains(',') {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() == 2 && parts[1].len() <= 2 {
            text.replace(',', ".")
        } else {
            text.replace(',', "")
        }
    } else if text.matches('.').count() > 1 {
        // Multiple dots are thousand separators
        text.replace('.', "")
    } else {
        text
    };

    normalized.parse::<f64>().ok()
}

fn extract_balance_sheet(text: &str) -> BalanceSheetFields {
    BalanceSheetFields {
        current_assets: labeled_value(text, &["tài sản ngắn hạn"]),
        cash_and_equivalents: labeled_value(text, &["tiền và", "tương đương tiền"]),
        short_term_investments: labeled_value(text, &["đầu tư", "ngắn hạn"]),
        accounts_receivable: labeled_value(text, &["phải thu", "ngắn hạn"]),
        inventory: labeled_value(text, &["hàng tồn kho"]),
        non_current_assets: labeled_value(text, &["tài sản dài hạn"]),
        fixed_assets: labeled_value(text, &["tài sản cố định"]),
        long_term_investments: labeled_value(text, &["đầu tư", "dài hạn"]),
        total_assets: labeled_value(text, &["tổng", "tài sản"]),
        total_liabilities: labeled_value(text, &["nợ phải trả"]),
        current_liabilities: labeled_value(text, &["nợ ngắn hạn"]),
        short_term_debt: labeled_value(text, &["vay", "ngắn hạn"]),
        accounts_payable: labeled_value(text, &["phải trả người bán"]),
        non_current_liabilities: labeled_value(text, &["nợ dài hạn"]),
        long_term_debt: labeled_value(text, &["vay", "dài hạn"]),
        total_equity: labeled_value(text, &["vốn chủ sở hữu"]),
        share_capital: labeled_value(text, &["vốn góp"]),
        retained_earnings: labeled_value(text, &["lợi nhuận", "chưa phân phối"]),
        minority_interest: labeled_value(text, &["lợi ích", "cổ đông", "thiểu số"]),
    }
}

fn extract_income_statement(text: &str) -> IncomeStatementFields {
    IncomeStatementFields {
        revenue: labeled_value(text, &["doanh thu", "bán hàng"]),
        cost_of_revenue: labeled_value(text, &["giá vốn", "hàng bán"]),
        gross_profit: labeled_value(text, &["lợi nhuận gộp"]),
        selling_expenses: labeled_value(text, &["chi phí", "bán hàng"]),
        administrative_expenses: labeled_value(text, &["chi phí", "quản lý"]),
        operating_income: labeled_value(text, &["lợi nhuận", "hoạt động", "kinh doanh"]),
        interest_income: labeled_value(text, &["doanh thu", "tài chính"]),
        interest_expense: labeled_value(text, &["chi phí", "lãi vay"]),
        other_income: labeled_value(text, &["thu nhập khác"]),
        other_expenses: labeled_value(text, &["chi phí khác"]),
        profit_before_tax: labeled_value(text, &["lợi nhuận", "trước thuế"]),
        income_tax: labeled_value(text, &["chi phí", "thuế", "tndn"]),
        net_income: labeled_value(text, &["lợi nhuận", "sau thuế"]),
        ..Default::default()
    }
}

fn extract_cash_flow(text: &str) -> CashFlowFields {
    CashFlowFields {
        operating_cash_flow: labeled_value(text, &["lưu chuyển tiền", "hoạt động", "kinh doanh"]),
        depreciation: labeled_value(text, &["khấu hao"]),
        investing_cash_flow: labeled_value(text, &["lưu chuyển tiền", "hoạt động", "đầu tư"]),
        capital_expenditure: labeled_value(text, &["mua sắm", "tscđ"]),
        financing_cash_flow: labeled_value(text, &["lưu chuyển tiền", "hoạt động", "tài chính"]),
        debt_issued: labeled_value(text, &["tiền thu", "đi vay"]),
        debt_repaid: labeled_value(text, &["tiền trả", "nợ", "vay"]),
        dividends_paid: labeled_value(text, &["cổ tức", "đã trả"]),
        beginning_cash: labeled_value(text, &["tiền", "đầu kỳ"]),
        ending_cash: labeled_value(text, &["tiền", "cuối kỳ"]),
        ..Default::default()
    }
}
