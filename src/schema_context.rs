//! Schema Context
//!
//! Static description of the inventory database used to ground every prompt:
//! table catalogue, business conventions and curated question/query exemplars.
//! Built once per process and shared read-only.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub data_type: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: Vec<ColumnSpec>,
    /// Columns holding a location id; a location-scoped caller must filter on one of them.
    pub location_columns: Vec<&'static str>,
    /// Not exposed to callers without a resolved scope.
    pub sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone)]
pub struct Exemplar {
    pub question: &'static str,
    pub sql: &'static str,
}

#[derive(Debug)]
pub struct SchemaContext {
    tables: Vec<TableSpec>,
    relationships: Vec<Relationship>,
    glossary: Vec<&'static str>,
    exemplars: Vec<Exemplar>,
    catalogue: String,
}

static SHARED: OnceLock<Arc<SchemaContext>> = OnceLock::new();

fn col(name: &'static str, data_type: &'static str, description: &'static str) -> ColumnSpec {
    ColumnSpec { name, data_type, description }
}

impl SchemaContext {
    /// Process-wide instance over the inventory schema.
    pub fn shared() -> Arc<SchemaContext> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(SchemaContext::inventory())))
    }

    pub fn inventory() -> Self {
        let tables = vec![
            TableSpec {
                name: "locations",
                description: "Warehouses, stores and supplier sites",
                columns: vec![
                    col("id", "BIGINT PK", "location id"),
                    col("name", "TEXT", "display name, e.g. 'Acme'"),
                    col("location_type", "TEXT", "'warehouse' | 'store' | 'supplier'"),
                    col("city", "TEXT", "city"),
                    col("address", "TEXT", "street address"),
                    col("created_at", "TIMESTAMP", "creation time"),
                ],
                location_columns: vec!["id"],
                sensitive: false,
            },
            TableSpec {
                name: "users",
                description: "Application accounts",
                columns: vec![
                    col("id", "BIGINT PK", "user id"),
                    col("name", "TEXT", "full name"),
                    col("email", "TEXT", "login email"),
                    col("role", "TEXT", "'admin' | 'owner' | 'supplier' | 'employee' | 'customer'"),
                    col("location_id", "BIGINT FK locations.id", "location the user belongs to"),
                    col("created_at", "TIMESTAMP", "creation time"),
                ],
                location_columns: vec!["location_id"],
                sensitive: true,
            },
            TableSpec {
                name: "articles",
                description: "Product catalogue",
                columns: vec![
                    col("id", "BIGINT PK", "article id"),
                    col("sku", "TEXT UNIQUE", "stock keeping unit"),
                    col("name", "TEXT", "product name"),
                    col("category", "TEXT", "product category"),
                    col("unit_price", "NUMERIC(12,2)", "list price"),
                    col("created_at", "TIMESTAMP", "creation time"),
                ],
                location_columns: vec![],
                sensitive: false,
            },
            TableSpec {
                name: "inventory",
                description: "Stock of each article per location",
                columns: vec![
                    col("id", "BIGINT PK", "row id"),
                    col("article_id", "BIGINT FK articles.id", "article"),
                    col("location_id", "BIGINT FK locations.id", "where the stock is held"),
                    col("quantity", "INTEGER", "units on hand"),
                    col("min_stock", "INTEGER", "reorder threshold"),
                    col("updated_at", "TIMESTAMP", "last stock movement"),
                ],
                location_columns: vec!["location_id"],
                sensitive: false,
            },
            TableSpec {
                name: "orders",
                description: "Purchase and sale orders between locations",
                columns: vec![
                    col("id", "BIGINT PK", "order id"),
                    col("order_type", "TEXT", "'purchase' | 'sale'"),
                    col("status", "TEXT", "'pending' | 'confirmed' | 'shipped' | 'delivered' | 'cancelled'"),
                    col("origin_location_id", "BIGINT FK locations.id", "sender (the supplier on purchases)"),
                    col("destination_location_id", "BIGINT FK locations.id", "receiver (the store on sales)"),
                    col("created_by", "BIGINT FK users.id", "user who placed the order"),
                    col("created_at", "TIMESTAMP", "order date"),
                    col("expected_delivery_date", "DATE", "promised delivery"),
                    col("delivered_at", "TIMESTAMP", "actual delivery, NULL until delivered"),
                ],
                location_columns: vec!["origin_location_id", "destination_location_id"],
                sensitive: false,
            },
            TableSpec {
                name: "order_items",
                description: "Lines of an order",
                columns: vec![
                    col("id", "BIGINT PK", "line id"),
                    col("order_id", "BIGINT FK orders.id", "parent order"),
                    col("article_id", "BIGINT FK articles.id", "article"),
                    col("quantity", "INTEGER", "units"),
                    col("unit_price", "NUMERIC(12,2)", "agreed price per unit"),
                ],
                location_columns: vec![],
                sensitive: false,
            },
        ];

        let relationships = vec![
            Relationship { from: "users.location_id", to: "locations.id" },
            Relationship { from: "inventory.article_id", to: "articles.id" },
            Relationship { from: "inventory.location_id", to: "locations.id" },
            Relationship { from: "orders.origin_location_id", to: "locations.id" },
            Relationship { from: "orders.destination_location_id", to: "locations.id" },
            Relationship { from: "orders.created_by", to: "users.id" },
            Relationship { from: "order_items.order_id", to: "orders.id" },
            Relationship { from: "order_items.article_id", to: "articles.id" },
        ];

        let glossary = vec![
            "A purchase is an order with order_type = 'purchase'; its origin location is the supplier.",
            "A sale is an order with order_type = 'sale'; its origin location is the selling store or warehouse.",
            "A supplier is a row of locations with location_type = 'supplier'; match suppliers by name with ILIKE.",
            "Order total = SUM(order_items.quantity * order_items.unit_price).",
            "Revenue only counts sales whose status is not 'cancelled'.",
            "An order is late when delivered_at::date > expected_delivery_date, or when it is undelivered past expected_delivery_date.",
            "Low stock means inventory.quantity <= inventory.min_stock.",
        ];

        let exemplars = vec![
            Exemplar {
                question: "Muestra los pedidos del proveedor Acme",
                sql: "SELECT o.id, o.status, o.created_at, SUM(oi.quantity * oi.unit_price) AS total \
FROM orders o JOIN locations l ON l.id = o.origin_location_id \
LEFT JOIN order_items oi ON oi.order_id = o.id \
WHERE o.order_type = 'purchase' AND l.location_type = 'supplier' AND l.name ILIKE '%Acme%' \
GROUP BY o.id, o.status, o.created_at ORDER BY o.created_at DESC LIMIT 50",
            },
            Exemplar {
                question: "¿Cuánto vendimos en los últimos 30 días?",
                sql: "SELECT COUNT(DISTINCT o.id) AS orders, SUM(oi.quantity * oi.unit_price) AS revenue \
FROM orders o JOIN order_items oi ON oi.order_id = o.id \
WHERE o.order_type = 'sale' AND o.status <> 'cancelled' \
AND o.created_at >= CURRENT_DATE - INTERVAL '30 days'",
            },
            Exemplar {
                question: "¿Qué artículos están por debajo del stock mínimo?",
                sql: "SELECT a.sku, a.name, l.name AS location, i.quantity, i.min_stock \
FROM inventory i JOIN articles a ON a.id = i.article_id JOIN locations l ON l.id = i.location_id \
WHERE i.quantity <= i.min_stock ORDER BY i.quantity ASC LIMIT 50",
            },
            Exemplar {
                question: "Top 5 artículos más vendidos este mes",
                sql: "SELECT a.name, SUM(oi.quantity) AS units \
FROM order_items oi JOIN orders o ON o.id = oi.order_id JOIN articles a ON a.id = oi.article_id \
WHERE o.order_type = 'sale' AND o.created_at >= date_trunc('month', CURRENT_DATE) \
GROUP BY a.name ORDER BY units DESC LIMIT 5",
            },
            Exemplar {
                question: "¿Qué pedidos están retrasados?",
                sql: "SELECT o.id, o.order_type, o.status, o.expected_delivery_date \
FROM orders o WHERE o.status NOT IN ('delivered', 'cancelled') \
AND o.expected_delivery_date < CURRENT_DATE ORDER BY o.expected_delivery_date LIMIT 50",
            },
        ];

        let catalogue = render_catalogue(&tables, &relationships, &glossary, &exemplars);

        Self { tables, relationships, glossary, exemplars, catalogue }
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> HashSet<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn glossary(&self) -> &[&'static str] {
        &self.glossary
    }

    pub fn exemplars(&self) -> &[Exemplar] {
        &self.exemplars
    }

    /// Prompt-ready text: tables, relationships, conventions and exemplars.
    pub fn catalogue(&self) -> &str {
        &self.catalogue
    }
}

fn render_catalogue(
    tables: &[TableSpec],
    relationships: &[Relationship],
    glossary: &[&'static str],
    exemplars: &[Exemplar],
) -> String {
    let mut out = String::from("## Tables\n");
    for table in tables {
        let _ = writeln!(out, "\n### {} -- {}", table.name, table.description);
        for column in &table.columns {
            let _ = writeln!(out, "- {} {}: {}", column.name, column.data_type, column.description);
        }
    }

    out.push_str("\n## Relationships\n");
    for rel in relationships {
        let _ = writeln!(out, "- {} -> {}", rel.from, rel.to);
    }

    out.push_str("\n## Business conventions\n");
    for rule in glossary {
        let _ = writeln!(out, "- {}", rule);
    }

    out.push_str("\n## Examples\n");
    for example in exemplars {
        let _ = writeln!(out, "Question: {}\nSQL: {}\n", example.question, example.sql);
    }
    out
}
