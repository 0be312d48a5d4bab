use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::domain::{Domain, Operator, OrderItem};
use crate::error::OrmResult;
use crate::ir::access::AccessMode;
use crate::model::Values;
use crate::query::{OrderDirection, Sql};
use crate::transaction::Transaction;

impl Transaction {
    /// Ids of the records of `model` matching `domain`, ordered by `order`
    /// (the model order when `None`) then by id
    pub fn search<'a>(
        &'a mut self,
        model: &'a str,
        domain: &'a Domain,
        offset: usize,
        limit: Option<usize>,
        order: Option<&'a [OrderItem]>,
    ) -> BoxFuture<'a, OrmResult<Vec<i64>>> {
        Box::pin(async move {
            let model = self.model(model)?;
            self.check_access(&model.name, AccessMode::Read).await?;
            let (mut tables, condition) = self.where_clause(&model, domain, AccessMode::Read).await?;
            let alias = tables.main_alias().to_string();

            let mut items: Vec<OrderItem> = order.map(<[_]>::to_vec).unwrap_or_else(|| model.order.clone());
            if !items.iter().any(|item| item.field == "id") {
                items.push(OrderItem::new("id", OrderDirection::Asc));
            }
            let order_by = self.compile_order(&model, &alias, &items, &mut tables)?;

            let mut select = tables
                .select()
                .column(Sql::column(&alias, "id"))
                .filter(condition)
                .limit(limit)
                .offset(offset);
            for clause in order_by {
                select = select.order_by(clause);
            }
            let ids = self.fetch_ids(&select.to_sql(self.dialect())).await?;
            debug!("search {} {} found {}", model.name, domain.to_json(), ids.len());
            Ok(ids)
        })
    }

    /// Number of records of `model` matching `domain`
    pub async fn search_count(&mut self, model: &str, domain: &Domain) -> OrmResult<i64> {
        let model = self.model(model)?;
        self.check_access(&model.name, AccessMode::Read).await?;
        let (tables, condition) = self.where_clause(&model, domain, AccessMode::Read).await?;
        let mut count = Sql::new("COUNT(DISTINCT ");
        count.append(Sql::column(tables.main_alias(), "id")).push(")");
        let select = tables.select().column(count).filter(condition);
        self.fetch_count(&select.to_sql(self.dialect())).await
    }

    /// `search` then `read` of the found records
    pub async fn search_read(
        &mut self,
        model: &str,
        domain: &Domain,
        fields: Option<&[&str]>,
        offset: usize,
        limit: Option<usize>,
        order: Option<&[OrderItem]>,
    ) -> OrmResult<Vec<Values>> {
        let ids = self.search(model, domain, offset, limit, order).await?;
        self.read(model, &ids, fields).await
    }

    /// Records whose name compares to `name` with `operator`, restricted to
    /// `domain`, with their display names
    pub async fn name_search(
        &mut self,
        model: &str,
        name: &str,
        domain: &Domain,
        operator: Operator,
        limit: Option<usize>,
    ) -> OrmResult<Vec<(i64, String)>> {
        let definition = self.model(model)?;
        let mut domain = domain.clone();
        if !name.is_empty() && definition.has_field(&definition.rec_name) {
            domain = Domain::and(vec![
                domain,
                Domain::leaf(definition.rec_name.clone(), operator, Value::from(name)),
            ]);
        }
        let ids = self.search(model, &domain, 0, limit, None).await?;
        self.name_get(model, &ids).await
    }
}
