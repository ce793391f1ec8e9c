//! Template rendering: placeholder substitution over text/HTML bodies.
//!
//! This is a deliberate minimal substitution engine, not a template
//! language. Tokens are replaced case-insensitively and globally; token text
//! is regex-escaped before being compiled, so stored field names containing
//! pattern metacharacters (`Exp.Date`, `Login (backup)`) substitute
//! literally. Missing or empty values render as a visible dash so incomplete
//! data shows up in the output instead of disappearing.
//!
//! Everything here is pure; template *resolution* (explicit body → fetched
//! URL → built-in default) happens in the orchestrator, fresh on every call.

use catalog::{AccountStock, LinkCategory, LinkItem, Product};
use common::{BuyerEmail, TransactionId};
use regex::RegexBuilder;

/// What a missing or empty binding renders as.
pub const MISSING_VALUE: &str = "-";

/// Default plain-text message for account products without a configured
/// template.
pub const DEFAULT_ACCOUNT_TEMPLATE: &str = "Terimakasih sudah membeli {Nama Produk}.
Detail Akun:
Email: {Email}
Password: {Password}
Transaction ID: {Transaction ID}";

/// Default HTML body for membership order notifications.
pub const DEFAULT_ORDER_TEMPLATE: &str = "<h2>Terima Kasih!</h2>\
<p>Pesanan berhasil diproses:</p>\
<p><b>{{product_names}}</b></p>\
<p>ID Transaksi: {{transaction_id}}</p>";

/// Default subject for membership order notifications.
pub const DEFAULT_ORDER_SUBJECT: &str = "Pesanan Berhasil: {{transaction_id}}";

/// Default HTML wrapper for link-category notifications. The repeater
/// splices one item card per purchased item into `{{items_list}}`.
pub const DEFAULT_CATEGORY_TEMPLATE: &str = "<h2>Akses Diberikan!</h2>\
<p>Berikut adalah akses link untuk produk yang Anda pesan ({{category_name}}):</p>\
{{items_list}}\
<p>Cek Google Drive (Dibagikan kepada saya).</p>\
<p>Transaction ID: {{transaction_id}}</p>";

/// Default subject for link-category notifications.
pub const DEFAULT_CATEGORY_SUBJECT: &str = "Link Akses Anda: {{transaction_id}}";

/// One rendered card per link item, spliced into `{{items_list}}`.
const ITEM_CARD_TEMPLATE: &str = "<div class=\"item-card\">\
<div class=\"item-header\"><span class=\"item-title\">{{item_name}}</span>\
<span class=\"item-badge\">ITEM</span></div>\
<table class=\"btn-grid\"><tr>\
<td class=\"btn-cell\"><a href=\"{{download_url}}\" class=\"btn-server\">⬇️ Server Utama</a></td>\
<td class=\"btn-cell\"><a href=\"{{drive_url}}\" class=\"btn-drive\">📂 Google Drive</a></td>\
</tr></table></div>";

/// Replaces every occurrence of `token` in `text`, case-insensitively.
///
/// The token is escaped before the pattern is compiled, and the value is
/// inserted verbatim (no capture-group expansion). Empty values become
/// [`MISSING_VALUE`].
pub fn replace_token(text: &str, token: &str, value: &str) -> String {
    let Ok(re) = RegexBuilder::new(&regex::escape(token))
        .case_insensitive(true)
        .build()
    else {
        // An escaped literal always compiles; leave the text untouched if
        // that assumption is ever broken.
        return text.to_string();
    };

    let value = if value.trim().is_empty() {
        MISSING_VALUE
    } else {
        value
    };

    re.replace_all(text, regex::NoExpand(value)).into_owned()
}

/// Applies a sequence of `(token, value)` bindings to a template.
pub fn render_tokens(template: &str, bindings: &[(&str, &str)]) -> String {
    bindings
        .iter()
        .fold(template.to_string(), |text, (token, value)| {
            replace_token(&text, token, value)
        })
}

/// Renders the notification for an allocated account stock unit.
///
/// Fixed tokens first, then one dynamic token per configured field in
/// declared order, then any stock-data keys the configuration doesn't
/// mention (imports can carry extra columns).
pub fn render_account_message(
    template: &str,
    product: &Product,
    stock: &AccountStock,
    transaction_id: &TransactionId,
    buyer: &BuyerEmail,
) -> String {
    let mut text = render_tokens(
        template,
        &[
            ("{Nama Produk}", product.name.as_str()),
            ("{Transaction ID}", transaction_id.as_str()),
            ("{Email Pembeli}", buyer.as_str()),
        ],
    );

    let configured = product
        .account_config
        .as_ref()
        .map(|c| c.fields.as_slice())
        .unwrap_or_default();

    for field in configured {
        let value = stock
            .account_data
            .get(&field.name)
            .map(String::as_str)
            .unwrap_or(MISSING_VALUE);
        text = replace_token(&text, &format!("{{{}}}", field.name), value);
    }

    for (key, value) in &stock.account_data {
        if configured.iter().any(|f| &f.name == key) {
            continue;
        }
        text = replace_token(&text, &format!("{{{key}}}"), value);
    }

    text
}

/// Renders one item card for a link item.
pub fn render_item_card(item: &LinkItem) -> String {
    render_tokens(
        ITEM_CARD_TEMPLATE,
        &[
            ("{{item_name}}", item.name.as_str()),
            ("{{download_url}}", item.download_url.as_deref().unwrap_or("#")),
            ("{{drive_url}}", item.drive_url.as_deref().unwrap_or("#")),
        ],
    )
}

/// Renders the grouped notification for one link category: one card per
/// item, in supplied order, spliced into the wrapper's `{{items_list}}`.
pub fn render_category_email(
    wrapper: &str,
    category: &LinkCategory,
    items: &[LinkItem],
    transaction_id: &TransactionId,
    buyer: &BuyerEmail,
) -> String {
    let cards: String = items.iter().map(render_item_card).collect();

    let text = replace_token(wrapper, "{{items_list}}", &cards);
    render_tokens(
        &text,
        &[
            ("{{category_name}}", category.name.as_str()),
            ("{{transaction_id}}", transaction_id.as_str()),
            ("{{buyer_email}}", buyer.as_str()),
        ],
    )
}
