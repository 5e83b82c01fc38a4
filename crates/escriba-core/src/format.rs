use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Fields rendered as MXN currency wherever they appear in the context.
const MONEY_FIELDS: [&str; 5] = [
    "total_fee",
    "monthly_retainer",
    "custom_fee",
    "monthly_fee",
    "revenue",
];

const MONTHS_ES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

fn is_money_field(field: &str) -> bool {
    MONEY_FIELDS.contains(&field)
}

fn is_date_field(field: &str) -> bool {
    field == "date" || field.ends_with("_date")
}

/// Render a resolved leaf value for substitution into a block, keyed on the
/// terminal path segment (the proposal renders for an es-MX readership).
pub fn format_value(path: &str, value: &Value) -> String {
    let field = path.rsplit('.').next().unwrap_or(path);
    match value {
        Value::String(s) => {
            if is_date_field(field) {
                format_long_date(s).unwrap_or_else(|| s.clone())
            } else {
                s.clone()
            }
        }
        Value::Number(n) => {
            if is_money_field(field) {
                format_currency(n.as_f64().unwrap_or(0.0))
            } else {
                format_number(n)
            }
        }
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// "$1,234,567.89": comma thousands, two decimals, sign preserved.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let units = cents / 100;
    let frac = cents % 100;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, group_thousands(units), frac)
}

/// Integer-valued numbers get thousands grouping; anything else passes
/// through serde_json's rendering.
pub fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        let grouped = group_thousands(i.unsigned_abs());
        if i < 0 {
            format!("-{}", grouped)
        } else {
            grouped
        }
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < 9e15 {
            let i = f as i64;
            let grouped = group_thousands(i.unsigned_abs());
            if i < 0 {
                format!("-{}", grouped)
            } else {
                grouped
            }
        } else {
            n.to_string()
        }
    } else {
        n.to_string()
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Long-form Spanish date: "2026-08-05" → "5 de agosto de 2026".
/// Accepts plain ISO dates or RFC 3339 timestamps; anything else is None
/// and the caller keeps the raw string.
pub fn format_long_date(raw: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))?;
    use chrono::Datelike;
    let month = MONTHS_ES.get(date.month0() as usize)?;
    Some(format!("{} de {} de {}", date.day(), month, date.year()))
}

/// Minimal HTML escaping for values substituted into rich-text blocks and
/// for plain-text blocks wrapped at assembly time.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn currency_groups_thousands_and_pads_cents() {
        assert_eq!(format_currency(185000.0), "$185,000.00");
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(950.5), "$950.50");
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(-1200.0), "-$1,200.00");
    }

    #[test]
    fn counts_group_thousands_without_currency() {
        assert_eq!(format_number(&serde_json::Number::from(240)), "240");
        assert_eq!(format_number(&serde_json::Number::from(12500)), "12,500");
        let frac = serde_json::Number::from_f64(2.5).unwrap();
        assert_eq!(format_number(&frac), "2.5");
    }

    #[test]
    fn money_fields_format_as_currency_by_terminal_segment() {
        let fee = json!(185000.0);
        assert_eq!(format_value("proposal.total_fee", &fee), "$185,000.00");
        let count = json!(240);
        assert_eq!(format_value("client.employee_count", &count), "240");
    }

    #[test]
    fn date_fields_render_long_spanish_form() {
        let date = json!("2026-08-05");
        assert_eq!(
            format_value("proposal.date", &date),
            "5 de agosto de 2026"
        );
    }

    #[test]
    fn unparseable_date_passes_through_raw() {
        let date = json!("proximamente");
        assert_eq!(format_value("proposal.date", &date), "proximamente");
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        assert_eq!(
            format_long_date("2025-01-09T12:30:00Z").as_deref(),
            Some("9 de enero de 2025")
        );
    }

    #[test]
    fn plain_strings_pass_through_untouched() {
        let s = json!("Grupo Industrial ABC");
        assert_eq!(format_value("client.group_name", &s), "Grupo Industrial ABC");
    }

    #[test]
    fn escape_covers_html_metacharacters() {
        assert_eq!(
            escape_html(r#"Pérez & Asociados <S.C.> "México""#),
            "Pérez &amp; Asociados &lt;S.C.&gt; &quot;México&quot;"
        );
    }
}
