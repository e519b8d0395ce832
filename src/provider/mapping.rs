//! Mapping from the provider's tabular rows to statement records.
//!
//! The upstream reports column headers in several spellings depending on
//! the requested language and endpoint generation (Vietnamese labels,
//! English labels, camelCase keys). Each field resolves through an alias
//! list, first present wins.

use serde_json::{Map, Value};

use crate::models::{
    BalanceSheetFields, CashFlowFields, IncomeStatementFields, PeriodKey, PeriodType,
    StatementFields, StatementKind, StatementRecord,
};

type Row = Map<String, Value>;

fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    // NaN means the provider had no figure for the line item
    parsed.filter(|v| !v.is_nan())
}

fn value_for(row: &Row, aliases: &[&str]) -> Option<f64> {
    aliases.iter().find_map(|name| row.get(*name).and_then(numeric))
}

fn int_for(row: &Row, aliases: &[&str]) -> Option<i64> {
    aliases.iter().find_map(|name| match row.get(*name) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

/// Parse the period out of a row. Year may arrive as a plain number, a
/// numeric string, or a composite like "2024-Q1".
pub fn parse_period(row: &Row, period_type: PeriodType) -> Option<PeriodKey> {
    let year_aliases = ["year", "yearReport", "Year", "Năm"];
    let quarter_aliases = ["quarter", "lengthReport", "Quarter", "Quý", "Kỳ"];

    // Composite "YYYY-Qn" string takes precedence
    for name in year_aliases {
        if let Some(Value::String(s)) = row.get(name) {
            if let Some((y, q)) = s.split_once("-Q") {
                let year = y.trim().parse::<i32>().ok()?;
                let quarter = q.trim().parse::<u32>().ok();
                return Some(match quarter {
                    Some(q) if (1..=4).contains(&q) => PeriodKey::quarterly(year, q),
                    _ => PeriodKey::annual(year),
                });
            }
        }
    }

    let year = int_for(row, &year_aliases)? as i32;
    let quarter = int_for(row, &quarter_aliases);

    Some(match (period_type, quarter) {
        (PeriodType::Quarter, Some(q)) if (1..=4).contains(&q) => {
            PeriodKey::quarterly(year, q as u32)
        }
        _ => PeriodKey::annual(year),
    })
}

pub fn balance_sheet_from_row(row: &Row) -> BalanceSheetFields {
    BalanceSheetFields {
        total_assets: value_for(row, &[
            "TỔNG CỘNG TÀI SẢN (đồng)", "TOTAL ASSETS (Bn. VND)", "asset", "totalAssets",
        ]),
        current_assets: value_for(row, &[
            "TÀI SẢN NGẮN HẠN (đồng)", "CURRENT ASSETS (Bn. VND)", "shortAsset", "currentAssets",
        ]),
        cash_and_equivalents: value_for(row, &[
            "Tiền và tương đương tiền (đồng)", "Cash and cash equivalents (Bn. VND)", "cash",
        ]),
        short_term_investments: value_for(row, &[
            "Giá trị thuần đầu tư ngắn hạn (đồng)", "Short-term investments (Bn. VND)", "shortInvest",
        ]),
        accounts_receivable: value_for(row, &[
            "Các khoản phải thu ngắn hạn (đồng)", "Accounts receivable (Bn. VND)", "shortReceivable",
        ]),
        inventory: value_for(row, &[
            "Hàng tồn kho ròng", "Hàng tồn kho, ròng (đồng)", "Net Inventories",
            "Inventories, Net (Bn. VND)", "inventory",
        ]),
        non_current_assets: value_for(row, &[
            "TÀI SẢN DÀI HẠN (đồng)", "LONG-TERM ASSETS (Bn. VND)", "longAsset",
        ]),
        fixed_assets: value_for(row, &[
            "Tài sản cố định (đồng)", "Fixed assets (Bn. VND)", "fixedAsset",
        ]),
        long_term_investments: value_for(row, &[
            "Đầu tư dài hạn (đồng)", "Long-term investments (Bn. VND)", "longInvest",
        ]),
        total_liabilities: value_for(row, &[
            "NỢ PHẢI TRẢ (đồng)", "LIABILITIES (Bn. VND)", "debt", "totalLiabilities",
        ]),
        current_liabilities: value_for(row, &[
            "Nợ ngắn hạn (đồng)", "Current liabilities (Bn. VND)", "shortDebt",
        ]),
        short_term_debt: value_for(row, &[
            "Vay và nợ thuê tài chính ngắn hạn (đồng)", "Short-term borrowings (Bn. VND)", "shortLoan",
        ]),
        accounts_payable: value_for(row, &[
            "Người mua trả tiền trước ngắn hạn (đồng)", "Advances from customers (Bn. VND)", "shortPayable",
        ]),
        non_current_liabilities: value_for(row, &[
            "Nợ dài hạn (đồng)", "Long-term liabilities (Bn. VND)", "longDebt",
        ]),
        long_term_debt: value_for(row, &[
            "Vay và nợ thuê tài chính dài hạn (đồng)", "Long-term borrowings (Bn. VND)", "longLoan",
        ]),
        total_equity: value_for(row, &[
            "VỐN CHỦ SỞ HỮU (đồng)", "OWNER'S EQUITY(Bn.VND)", "equity", "totalEquity",
        ]),
        share_capital: value_for(row, &[
            "Vốn góp của chủ sở hữu (đồng)", "Paid-in capital (Bn. VND)", "capital",
        ]),
        retained_earnings: value_for(row, &[
            "Lãi chưa phân phối (đồng)", "Undistributed earnings (Bn. VND)", "undistriProfitCurrentTerm",
        ]),
        minority_interest: value_for(row, &[
            "LỢI ÍCH CỦA CỔ ĐÔNG THIỂU SỐ", "MINORITY INTERESTS", "minorShareHolderProfit",
        ]),
    }
}

pub fn income_statement_from_row(row: &Row) -> IncomeStatementFields {
    IncomeStatementFields {
        revenue: value_for(row, &[
            "Doanh thu thuần", "Doanh thu (đồng)", "Revenue (Bn. VND)", "Net Sales", "revenue",
        ]),
        cost_of_revenue: value_for(row, &[
            "Giá vốn hàng bán", "Cost of Sales", "costOfGoodSold",
        ]),
        gross_profit: value_for(row, &["Lãi gộp", "Gross Profit", "grossProfit"]),
        operating_expenses: value_for(row, &[
            "Chi phí tài chính", "Financial Expenses", "operationExpense",
        ]),
        selling_expenses: value_for(row, &[
            "Chi phí bán hàng", "Selling Expenses", "sellingExpense",
        ]),
        administrative_expenses: value_for(row, &[
            "Chi phí quản lý DN", "General & Admin Expenses", "adminExpense",
        ]),
        operating_income: value_for(row, &[
            "Lãi/Lỗ từ hoạt động kinh doanh", "Operating Profit/Loss", "operationProfit",
        ]),
        interest_expense: value_for(row, &[
            "Chi phí tiền lãi vay", "Interest Expenses", "interestExpense",
        ]),
        interest_income: value_for(row, &[
            "Thu nhập tài chính", "Financial Income", "interestIncome",
        ]),
        other_income: value_for(row, &["Thu nhập khác", "Other income", "otherIncome"]),
        other_expenses: value_for(row, &[
            "Thu nhập/Chi phí khác", "Lợi nhuận khác", "Other Income/Expenses", "otherExpense",
        ]),
        profit_before_tax: value_for(row, &[
            "LN trước thuế", "Profit before tax", "preTaxProfit",
        ]),
        income_tax: value_for(row, &[
            "Chi phí thuế TNDN hiện hành", "Business income tax - current", "taxExpense",
        ]),
        net_income: value_for(row, &[
            "Lợi nhuận thuần", "Net Profit For the Year", "postTaxProfit",
        ]),
        net_income_attributable: value_for(row, &[
            "Lợi nhuận sau thuế của Cổ đông công ty mẹ (đồng)", "Cổ đông của Công ty mẹ",
            "Attributable to parent company", "Attribute to parent company (Bn. VND)",
            "shareHolderIncome",
        ]),
        eps: value_for(row, &["eps", "EPS", "earningsPerShare"]),
    }
}

pub fn cash_flow_from_row(row: &Row) -> CashFlowFields {
    CashFlowFields {
        operating_cash_flow: value_for(row, &[
            "Lưu chuyển tiền tệ ròng từ các hoạt động SXKD",
            "Net cash inflows/outflows from operating activities", "fromSale",
        ]),
        net_income_cf: value_for(row, &[
            "Lãi/Lỗ ròng trước thuế", "Net Profit/Loss before tax", "fromProfit",
        ]),
        depreciation: value_for(row, &[
            "Khấu hao TSCĐ", "Depreciation and Amortisation", "depreciation",
        ]),
        changes_in_working_capital: value_for(row, &[
            "Lưu chuyển tiền thuần từ HĐKD trước thay đổi VLĐ",
            "Operating profit before changes in working capital", "changeInWorkingCapital",
        ]),
        investing_cash_flow: value_for(row, &[
            "Lưu chuyển từ hoạt động đầu tư",
            "Net Cash Flows from Investing Activities", "fromInvest",
        ]),
        capital_expenditure: value_for(row, &[
            "Mua sắm TSCĐ", "Purchase of fixed assets", "purchaseFixedAsset",
        ]),
        investments_purchases: value_for(row, &[
            "Tiền chi cho vay, mua công cụ nợ của đơn vị khác (đồng)",
            "Đầu tư vào các doanh nghiệp khác",
            "Investment in other entities",
            "Loans granted, purchases of debt instruments (Bn. VND)",
        ]),
        investments_sales: value_for(row, &[
            "Tiền thu từ việc bán các khoản đầu tư vào doanh nghiệp khác",
            "Tiền thu hồi cho vay, bán lại các công cụ nợ của đơn vị khác (đồng)",
            "Proceeds from divestment in other entities", "investmentSales",
        ]),
        financing_cash_flow: value_for(row, &[
            "Lưu chuyển tiền từ hoạt động tài chính",
            "Cash flows from financial activities", "fromFinancial",
        ]),
        debt_issued: value_for(row, &[
            "Tiền thu được các khoản đi vay", "Proceeds from borrowings", "receiveInvestment",
        ]),
        debt_repaid: value_for(row, &[
            "Tiền trả các khoản đi vay", "Repayment of borrowings", "paybackDebt",
        ]),
        dividends_paid: value_for(row, &["Cổ tức đã trả", "Dividends paid", "dividendsPaid"]),
        stock_issued: value_for(row, &[
            "Tăng vốn cổ phần từ góp vốn và/hoặc phát hành cổ phiếu",
            "Increase in charter captial", "stockIssued",
        ]),
        stock_repurchased: value_for(row, &[
            "Chi trả cho việc mua lại, trả cổ phiếu",
            "Payments for share repurchases", "stockRepurchased",
        ]),
        net_change_in_cash: value_for(row, &[
            "Lưu chuyển tiền thuần trong kỳ",
            "Net increase/decrease in cash and cash equivalents", "freeCashFlow",
        ]),
        beginning_cash: value_for(row, &[
            "Tiền và tương đương tiền", "Cash and cash equivalents", "beginningCash",
        ]),
        ending_cash: value_for(row, &[
            "Tiền và tương đương tiền cuối kỳ",
            "Cash and Cash Equivalents at the end of period", "endingCash",
        ]),
    }
}

/// Convert one provider row into a statement record, skipping rows whose
/// period cannot be determined.
pub fn record_from_row(
    kind: StatementKind,
    period_type: PeriodType,
    row: &Row,
) -> Option<StatementRecord> {
    let key = parse_period(row, period_type)?;
    let fields = match kind {
        StatementKind::BalanceSheet => StatementFields::Balance(balance_sheet_from_row(row)),
        StatementKind::IncomeStatement => StatementFields::Income(income_statement_from_row(row)),
        StatementKind::CashFlow => StatementFields::CashFlow(cash_flow_from_row(row)),
    };
    Some(StatementRecord { key, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn parses_plain_annual_period() {
        let r = row(json!({"yearReport": 2023}));
        let key = parse_period(&r, PeriodType::Annual).unwrap();
        assert_eq!(key, PeriodKey::annual(2023));
    }

    #[test]
    fn parses_quarterly_period() {
        let r = row(json!({"yearReport": 2024, "lengthReport": 2}));
        let key = parse_period(&r, PeriodType::Quarter).unwrap();
        assert_eq!(key, PeriodKey::quarterly(2024, 2));
    }

    #[test]
    fn parses_composite_year_quarter_string() {
        let r = row(json!({"year": "2024-Q1"}));
        let key = parse_period(&r, PeriodType::Quarter).unwrap();
        assert_eq!(key, PeriodKey::quarterly(2024, 1));
    }

    #[test]
    fn quarter_ignored_for_annual_request() {
        // Annual rows may still carry a length marker (e.g. 5 = full year)
        let r = row(json!({"year": 2022, "lengthReport": 5}));
        let key = parse_period(&r, PeriodType::Annual).unwrap();
        assert_eq!(key, PeriodKey::annual(2022));
    }

    #[test]
    fn missing_year_yields_no_record() {
        let r = row(json!({"revenue": 100.0}));
        assert!(parse_period(&r, PeriodType::Annual).is_none());
    }

    #[test]
    fn resolves_field_aliases() {
        let r = row(json!({
            "yearReport": 2023,
            "asset": 1000.0,
            "debt": 400.0,
            "equity": 600.0
        }));
        let fields = balance_sheet_from_row(&r);
        assert_eq!(fields.total_assets, Some(1000.0));
        assert_eq!(fields.total_liabilities, Some(400.0));
        assert_eq!(fields.total_equity, Some(600.0));
        assert_eq!(fields.inventory, None);
    }

    #[test]
    fn nan_treated_as_absent() {
        let mut r = row(json!({"yearReport": 2023}));
        r.insert("revenue".to_string(), json!("NaN"));
        let fields = income_statement_from_row(&r);
        assert_eq!(fields.revenue, None);
    }

    #[test]
    fn record_from_row_tags_kind() {
        let r = row(json!({"yearReport": 2023, "revenue": 5.0}));
        let record = record_from_row(StatementKind::IncomeStatement, PeriodType::Annual, &r).unwrap();
        assert_eq!(record.fields.kind(), StatementKind::IncomeStatement);
        assert_eq!(record.key.label(), "2023");
    }
}
