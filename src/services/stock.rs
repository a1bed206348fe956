use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

/// Loads the product and reports whether the requested quantity is on hand.
/// Advisory only; the decrement below is what actually guards against
/// oversell under concurrency.
#[instrument(skip(db))]
pub async fn check_availability<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<product::Model, ServiceError> {
    let product = product::Entity::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
    if product.stock < quantity {
        return Err(ServiceError::InsufficientStock(product.name));
    }
    Ok(product)
}

/// Atomically decrements stock with a guarded UPDATE:
///
/// ```sql
/// UPDATE products SET stock = stock - ?
/// WHERE id = ? AND stock >= ?
/// ```
///
/// Zero rows affected means a concurrent order drained the stock first.
#[instrument(skip(db))]
pub async fn decrement<C: ConnectionTrait>(
    db: &C,
    product_id: Uuid,
    product_name: &str,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(product_name.to_string()));
    }
    Ok(())
}
