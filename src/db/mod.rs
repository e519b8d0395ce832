use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::models::{
    BalanceSheetFields, CashFlowFields, IncomeStatementFields, PeriodKey, PeriodType,
    StatementKind, Stock,
};

/// SQLX-based database manager.
///
/// Statement tables carry a `UNIQUE(stock_id, period_type, year, quarter)`
/// constraint; quarter is stored as 0 for annual periods so the unique
/// index holds (SQLite treats NULLs as distinct in unique constraints).
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn quarter_to_db(quarter: Option<u32>) -> i64 {
    quarter.map(|q| q as i64).unwrap_or(0)
}

impl Database {
    /// Open (or create) the database and ensure the schema exists
    pub async fn new(database_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(database_path)
                    .create_if_missing(true),
            )
            .await?;

        // WAL for concurrent readers while the sweep writes
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        let db = Self { pool };
        db.create_schema().await?;
        info!("Database initialized at {}", database_path);
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT UNIQUE NOT NULL,
                name TEXT,
                exchange TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_sheets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_id INTEGER NOT NULL,
                period_type TEXT NOT NULL,
                year INTEGER NOT NULL,
                quarter INTEGER NOT NULL DEFAULT 0,
                period TEXT NOT NULL,
                total_assets REAL,
                current_assets REAL,
                cash_and_equivalents REAL,
                short_term_investments REAL,
                accounts_receivable REAL,
                inventory REAL,
                non_current_assets REAL,
                fixed_assets REAL,
                long_term_investments REAL,
                total_liabilities REAL,
                current_liabilities REAL,
                short_term_debt REAL,
                accounts_payable REAL,
                non_current_liabilities REAL,
                long_term_debt REAL,
                total_equity REAL,
                share_capital REAL,
                retained_earnings REAL,
                minority_interest REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (stock_id) REFERENCES stocks(id) ON DELETE CASCADE,
                UNIQUE(stock_id, period_type, year, quarter)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS income_statements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_id INTEGER NOT NULL,
                period_type TEXT NOT NULL,
                year INTEGER NOT NULL,
                quarter INTEGER NOT NULL DEFAULT 0,
                period TEXT NOT NULL,
                revenue REAL,
                cost_of_revenue REAL,
                gross_profit REAL,
                operating_expenses REAL,
                selling_expenses REAL,
                administrative_expenses REAL,
                operating_income REAL,
                interest_expense REAL,
                interest_income REAL,
                other_income REAL,
                other_expenses REAL,
                profit_before_tax REAL,
                income_tax REAL,
                net_income REAL,
                net_income_attributable REAL,
                eps REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (stock_id) REFERENCES stocks(id) ON DELETE CASCADE,
                UNIQUE(stock_id, period_type, year, quarter)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cash_flow_statements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_id INTEGER NOT NULL,
                period_type TEXT NOT NULL,
                year INTEGER NOT NULL,
                quarter INTEGER NOT NULL DEFAULT 0,
                period TEXT NOT NULL,
                operating_cash_flow REAL,
                net_income_cf REAL,
                depreciation REAL,
                changes_in_working_capital REAL,
                investing_cash_flow REAL,
                capital_expenditure REAL,
                investments_purchases REAL,
                investments_sales REAL,
                financing_cash_flow REAL,
                debt_issued REAL,
                debt_repaid REAL,
                dividends_paid REAL,
                stock_issued REAL,
                stock_repurchased REAL,
                net_change_in_cash REAL,
                beginning_cash REAL,
                ending_cash REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (stock_id) REFERENCES stocks(id) ON DELETE CASCADE,
                UNIQUE(stock_id, period_type, year, quarter)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stocks_symbol ON stocks(symbol)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn map_stock(row: &sqlx::sqlite::SqliteRow) -> Result<Stock> {
        let created_at: Option<NaiveDateTime> = row.try_get("created_at")?;
        Ok(Stock {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            exchange: row.try_get("exchange")?,
            created_at: created_at.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
        })
    }

    /// Look up a stock by (already uppercased) ticker
    pub async fn get_stock_by_symbol(&self, symbol: &str) -> Result<Option<Stock>> {
        let row = sqlx::query("SELECT id, symbol, name, exchange, created_at FROM stocks WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_stock).transpose()
    }

    /// Insert a stock row; returns its id. The symbol must not exist yet.
    pub async fn insert_stock(&self, symbol: &str, name: Option<&str>, exchange: Option<&str>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO stocks (symbol, name, exchange) VALUES (?, ?, ?)")
            .bind(symbol)
            .bind(name)
            .bind(exchange)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// All known stocks, ordered by symbol
    pub async fn all_stocks(&self) -> Result<Vec<Stock>> {
        let rows = sqlx::query("SELECT id, symbol, name, exchange, created_at FROM stocks ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_stock).collect()
    }

    /// Search stocks by symbol or name: prefix matches rank above
    /// substring matches, then alphabetical by symbol.
    pub async fn search_stocks(&self, query: &str, limit: usize) -> Result<Vec<Stock>> {
        let prefix = format!("{}%", query);
        let contains = format!("%{}%", query);

        let rows = sqlx::query(
            r#"
            SELECT id, symbol, name, exchange, created_at FROM stocks
            WHERE symbol LIKE ? OR symbol LIKE ? OR name LIKE ?
            ORDER BY CASE WHEN symbol LIKE ? THEN 0 ELSE 1 END, symbol
            LIMIT ?
            "#,
        )
        .bind(&prefix)
        .bind(&contains)
        .bind(&contains)
        .bind(&prefix)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_stock).collect()
    }

    /// Insert a balance sheet unless the composite period key already
    /// exists. Returns whether a row was written.
    pub async fn insert_balance_sheet_if_absent(
        &self,
        stock_id: i64,
        key: &PeriodKey,
        fields: &BalanceSheetFields,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO balance_sheets (
                stock_id, period_type, year, quarter, period,
                total_assets, current_assets, cash_and_equivalents,
                short_term_investments, accounts_receivable, inventory,
                non_current_assets, fixed_assets, long_term_investments,
                total_liabilities, current_liabilities, short_term_debt,
                accounts_payable, non_current_liabilities, long_term_debt,
                total_equity, share_capital, retained_earnings, minority_interest
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_id, period_type, year, quarter) DO NOTHING
            "#,
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .bind(key.label())
        .bind(fields.total_assets)
        .bind(fields.current_assets)
        .bind(fields.cash_and_equivalents)
        .bind(fields.short_term_investments)
        .bind(fields.accounts_receivable)
        .bind(fields.inventory)
        .bind(fields.non_current_assets)
        .bind(fields.fixed_assets)
        .bind(fields.long_term_investments)
        .bind(fields.total_liabilities)
        .bind(fields.current_liabilities)
        .bind(fields.short_term_debt)
        .bind(fields.accounts_payable)
        .bind(fields.non_current_liabilities)
        .bind(fields.long_term_debt)
        .bind(fields.total_equity)
        .bind(fields.share_capital)
        .bind(fields.retained_earnings)
        .bind(fields.minority_interest)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert an income statement unless the period key exists
    pub async fn insert_income_statement_if_absent(
        &self,
        stock_id: i64,
        key: &PeriodKey,
        fields: &IncomeStatementFields,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO income_statements (
                stock_id, period_type, year, quarter, period,
                revenue, cost_of_revenue, gross_profit, operating_expenses,
                selling_expenses, administrative_expenses, operating_income,
                interest_expense, interest_income, other_income, other_expenses,
                profit_before_tax, income_tax, net_income,
                net_income_attributable, eps
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_id, period_type, year, quarter) DO NOTHING
            "#,
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .bind(key.label())
        .bind(fields.revenue)
        .bind(fields.cost_of_revenue)
        .bind(fields.gross_profit)
        .bind(fields.operating_expenses)
        .bind(fields.selling_expenses)
        .bind(fields.administrative_expenses)
        .bind(fields.operating_income)
        .bind(fields.interest_expense)
        .bind(fields.interest_income)
        .bind(fields.other_income)
        .bind(fields.other_expenses)
        .bind(fields.profit_before_tax)
        .bind(fields.income_tax)
        .bind(fields.net_income)
        .bind(fields.net_income_attributable)
        .bind(fields.eps)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert a cash flow statement unless the period key exists
    pub async fn insert_cash_flow_if_absent(
        &self,
        stock_id: i64,
        key: &PeriodKey,
        fields: &CashFlowFields,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cash_flow_statements (
                stock_id, period_type, year, quarter, period,
                operating_cash_flow, net_income_cf, depreciation,
                changes_in_working_capital, investing_cash_flow,
                capital_expenditure, investments_purchases, investments_sales,
                financing_cash_flow, debt_issued, debt_repaid, dividends_paid,
                stock_issued, stock_repurchased, net_change_in_cash,
                beginning_cash, ending_cash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_id, period_type, year, quarter) DO NOTHING
            "#,
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .bind(key.label())
        .bind(fields.operating_cash_flow)
        .bind(fields.net_income_cf)
        .bind(fields.depreciation)
        .bind(fields.changes_in_working_capital)
        .bind(fields.investing_cash_flow)
        .bind(fields.capital_expenditure)
        .bind(fields.investments_purchases)
        .bind(fields.investments_sales)
        .bind(fields.financing_cash_flow)
        .bind(fields.debt_issued)
        .bind(fields.debt_repaid)
        .bind(fields.dividends_paid)
        .bind(fields.stock_issued)
        .bind(fields.stock_repurchased)
        .bind(fields.net_change_in_cash)
        .bind(fields.beginning_cash)
        .bind(fields.ending_cash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Read back a stored balance sheet for a period key
    pub async fn get_balance_sheet(
        &self,
        stock_id: i64,
        key: &PeriodKey,
    ) -> Result<Option<BalanceSheetFields>> {
        let row = sqlx::query(
            "SELECT * FROM balance_sheets WHERE stock_id = ? AND period_type = ? AND year = ? AND quarter = ?",
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(BalanceSheetFields {
            total_assets: row.try_get("total_assets")?,
            current_assets: row.try_get("current_assets")?,
            cash_and_equivalents: row.try_get("cash_and_equivalents")?,
            short_term_investments: row.try_get("short_term_investments")?,
            accounts_receivable: row.try_get("accounts_receivable")?,
            inventory: row.try_get("inventory")?,
            non_current_assets: row.try_get("non_current_assets")?,
            fixed_assets: row.try_get("fixed_assets")?,
            long_term_investments: row.try_get("long_term_investments")?,
            total_liabilities: row.try_get("total_liabilities")?,
            current_liabilities: row.try_get("current_liabilities")?,
            short_term_debt: row.try_get("short_term_debt")?,
            accounts_payable: row.try_get("accounts_payable")?,
            non_current_liabilities: row.try_get("non_current_liabilities")?,
            long_term_debt: row.try_get("long_term_debt")?,
            total_equity: row.try_get("total_equity")?,
            share_capital: row.try_get("share_capital")?,
            retained_earnings: row.try_get("retained_earnings")?,
            minority_interest: row.try_get("minority_interest")?,
        }))
    }

    /// Read back a stored income statement for a period key
    pub async fn get_income_statement(
        &self,
        stock_id: i64,
        key: &PeriodKey,
    ) -> Result<Option<IncomeStatementFields>> {
        let row = sqlx::query(
            "SELECT * FROM income_statements WHERE stock_id = ? AND period_type = ? AND year = ? AND quarter = ?",
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(IncomeStatementFields {
            revenue: row.try_get("revenue")?,
            cost_of_revenue: row.try_get("cost_of_revenue")?,
            gross_profit: row.try_get("gross_profit")?,
            operating_expenses: row.try_get("operating_expenses")?,
            selling_expenses: row.try_get("selling_expenses")?,
            administrative_expenses: row.try_get("administrative_expenses")?,
            operating_income: row.try_get("operating_income")?,
            interest_expense: row.try_get("interest_expense")?,
            interest_income: row.try_get("interest_income")?,
            other_income: row.try_get("other_income")?,
            other_expenses: row.try_get("other_expenses")?,
            profit_before_tax: row.try_get("profit_before_tax")?,
            income_tax: row.try_get("income_tax")?,
            net_income: row.try_get("net_income")?,
            net_income_attributable: row.try_get("net_income_attributable")?,
            eps: row.try_get("eps")?,
        }))
    }

    /// Read back a stored cash flow statement for a period key
    pub async fn get_cash_flow(
        &self,
        stock_id: i64,
        key: &PeriodKey,
    ) -> Result<Option<CashFlowFields>> {
        let row = sqlx::query(
            "SELECT * FROM cash_flow_statements WHERE stock_id = ? AND period_type = ? AND year = ? AND quarter = ?",
        )
        .bind(stock_id)
        .bind(key.period_type.as_str())
        .bind(key.year)
        .bind(quarter_to_db(key.quarter))
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(CashFlowFields {
            operating_cash_flow: row.try_get("operating_cash_flow")?,
            net_income_cf: row.try_get("net_income_cf")?,
            depreciation: row.try_get("depreciation")?,
            changes_in_working_capital: row.try_get("changes_in_working_capital")?,
            investing_cash_flow: row.try_get("investing_cash_flow")?,
            capital_expenditure: row.try_get("capital_expenditure")?,
            investments_purchases: row.try_get("investments_purchases")?,
            investments_sales: row.try_get("investments_sales")?,
            financing_cash_flow: row.try_get("financing_cash_flow")?,
            debt_issued: row.try_get("debt_issued")?,
            debt_repaid: row.try_get("debt_repaid")?,
            dividends_paid: row.try_get("dividends_paid")?,
            stock_issued: row.try_get("stock_issued")?,
            stock_repurchased: row.try_get("stock_repurchased")?,
            net_change_in_cash: row.try_get("net_change_in_cash")?,
            beginning_cash: row.try_get("beginning_cash")?,
            ending_cash: row.try_get("ending_cash")?,
        }))
    }

    /// Count stored statements of one kind for a stock
    pub async fn count_statements(&self, stock_id: i64, kind: StatementKind) -> Result<i64> {
        let table = match kind {
            StatementKind::BalanceSheet => "balance_sheets",
            StatementKind::IncomeStatement => "income_statements",
            StatementKind::CashFlow => "cash_flow_statements",
        };

        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {} WHERE stock_id = ?", table))
            .bind(stock_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }

    /// Stored years of one period type for a stock and kind, newest first
    pub async fn statement_years(
        &self,
        stock_id: i64,
        kind: StatementKind,
        period_type: PeriodType,
    ) -> Result<Vec<i32>> {
        let table = match kind {
            StatementKind::BalanceSheet => "balance_sheets",
            StatementKind::IncomeStatement => "income_statements",
            StatementKind::CashFlow => "cash_flow_statements",
        };

        let rows = sqlx::query(&format!(
            "SELECT year FROM {} WHERE stock_id = ? AND period_type = ? ORDER BY year DESC",
            table
        ))
        .bind(stock_id)
        .bind(period_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Ok(row.try_get("year")?)).collect()
    }
}
