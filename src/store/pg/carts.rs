use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper, pg::Pg, upsert::excluded,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use super::PgStore;
use crate::{
    carts::{
        CartError, CartStore,
        models::{Cart, CartItem, CartLine, CartOwner, MergeOutcome},
    },
    models::{CartEntity, CartItemEntity, CartTotalChangeset, CreateCartEntity, CreateCartItemEntity},
    money,
    schema::{cart_items, carts, products},
    sessions::SessionKey,
};

impl TryFrom<CartEntity> for Cart {
    type Error = anyhow::Error;

    fn try_from(entity: CartEntity) -> anyhow::Result<Self> {
        let owner = match (entity.user_id, entity.session_key) {
            (Some(user_id), None) => CartOwner::User(user_id),
            (None, Some(key)) => CartOwner::Session(
                SessionKey::parse(&key)
                    .with_context(|| format!("cart {} has a malformed session key", entity.id))?,
            ),
            _ => return Err(anyhow!("cart {} must have exactly one owner", entity.id)),
        };

        Ok(Cart {
            id: entity.id,
            owner,
            total_minor: entity.total_minor,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}

impl From<CartItemEntity> for CartItem {
    fn from(entity: CartItemEntity) -> Self {
        CartItem {
            id: entity.id,
            cart_id: entity.cart_id,
            product_id: entity.product_id,
            quantity: entity.quantity,
            added_at: entity.added_at,
        }
    }
}

fn owned_by(owner: &CartOwner) -> carts::BoxedQuery<'static, Pg> {
    match owner {
        CartOwner::User(user_id) => carts::table.filter(carts::user_id.eq(*user_id)).into_boxed(),
        CartOwner::Session(key) => carts::table
            .filter(carts::session_key.eq(key.as_str().to_string()))
            .into_boxed(),
    }
}

fn owner_columns(owner: &CartOwner) -> CreateCartEntity {
    match owner {
        CartOwner::User(user_id) => CreateCartEntity {
            user_id: Some(*user_id),
            session_key: None,
        },
        CartOwner::Session(key) => CreateCartEntity {
            user_id: None,
            session_key: Some(key.as_str().to_string()),
        },
    }
}

/// Locks the cart row for the rest of the transaction. A cart that is gone
/// was merged or deleted concurrently.
pub(super) async fn lock_cart(
    conn: &mut AsyncPgConnection,
    cart_id: i32,
) -> Result<CartEntity, CartError> {
    carts::table
        .find(cart_id)
        .select(CartEntity::as_select())
        .for_update()
        .get_result(conn)
        .await
        .optional()?
        .ok_or(CartError::Conflict)
}

pub(super) async fn load_lines(
    conn: &mut AsyncPgConnection,
    cart_id: i32,
) -> Result<Vec<CartLine>, CartError> {
    let rows: Vec<(CartItemEntity, String, i64)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::cart_id.eq(cart_id))
        .order_by(cart_items::id.asc())
        .select((
            CartItemEntity::as_select(),
            products::name,
            products::price_minor,
        ))
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(item, product_name, unit_price_minor)| CartLine {
            item: item.into(),
            product_name,
            unit_price_minor,
        })
        .collect())
}

/// Sums price times quantity over the current lines and stores the result.
pub(super) async fn recompute(
    conn: &mut AsyncPgConnection,
    cart_id: i32,
) -> Result<CartEntity, CartError> {
    let amounts: Vec<(i64, i32)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::cart_id.eq(cart_id))
        .select((products::price_minor, cart_items::quantity))
        .load(conn)
        .await?;

    let total_minor = amounts
        .into_iter()
        .map(|(price, quantity)| money::line_total(price, quantity))
        .collect::<Option<Vec<i64>>>()
        .and_then(money::sum)
        .ok_or_else(|| anyhow!("total of cart {cart_id} overflows"))?;

    diesel::update(carts::table.find(cart_id))
        .set(CartTotalChangeset {
            total_minor,
            updated_at: Utc::now(),
        })
        .returning(CartEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or(CartError::NotFound("Cart"))
}

#[async_trait]
impl CartStore for PgStore {
    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart, CartError> {
        let conn = &mut self.conn().await?;

        let existing: Option<CartEntity> = owned_by(owner)
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?;
        if let Some(cart) = existing {
            return Ok(Cart::try_from(cart)?);
        }

        // Two requests of the same owner may race here; the unique owner
        // columns let exactly one insert win and both read the same row.
        diesel::insert_into(carts::table)
            .values(owner_columns(owner))
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;

        let cart: CartEntity = owned_by(owner)
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?
            .ok_or(CartError::Conflict)?;

        Ok(Cart::try_from(cart)?)
    }

    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, CartError> {
        let conn = &mut self.conn().await?;

        let cart: Option<CartEntity> = owned_by(owner)
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        Ok(cart.map(Cart::try_from).transpose()?)
    }

    async fn find_anonymous_cart(&self, id: i32) -> Result<Option<Cart>, CartError> {
        let conn = &mut self.conn().await?;

        let cart: Option<CartEntity> = carts::table
            .find(id)
            .filter(carts::user_id.is_null())
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        Ok(cart.map(Cart::try_from).transpose()?)
    }

    async fn load_cart(&self, id: i32) -> Result<Option<(Cart, Vec<CartLine>)>, CartError> {
        let conn = &mut self.conn().await?;

        conn.build_transaction()
            .repeatable_read()
            .read_only()
            .run(|conn| {
                Box::pin(async move {
                    let cart: Option<CartEntity> = carts::table
                        .find(id)
                        .select(CartEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(cart) = cart else {
                        return Ok::<_, CartError>(None);
                    };

                    let lines = load_lines(conn, cart.id).await?;
                    Ok(Some((Cart::try_from(cart)?, lines)))
                })
            })
            .await
    }

    async fn add_item(
        &self,
        cart_id: i32,
        product_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                lock_cart(conn, cart_id).await?;

                let product: Option<i32> = products::table
                    .find(product_id)
                    .select(products::id)
                    .first(conn)
                    .await
                    .optional()?;
                if product.is_none() {
                    return Err(CartError::NotFound("Product"));
                }

                // The cart lock keeps the line's quantity stable until the upsert.
                let existing: Option<i32> = cart_items::table
                    .filter(cart_items::cart_id.eq(cart_id))
                    .filter(cart_items::product_id.eq(product_id))
                    .select(cart_items::quantity)
                    .first(conn)
                    .await
                    .optional()?;
                if existing.is_some_and(|held| held.checked_add(quantity).is_none()) {
                    return Err(CartError::InvalidArgument("quantity would overflow".into()));
                }

                let item: CartItemEntity = diesel::insert_into(cart_items::table)
                    .values(CreateCartItemEntity {
                        cart_id,
                        product_id,
                        quantity,
                    })
                    .on_conflict((cart_items::cart_id, cart_items::product_id))
                    .do_update()
                    .set(cart_items::quantity.eq(cart_items::quantity + excluded(cart_items::quantity)))
                    .returning(CartItemEntity::as_returning())
                    .get_result(conn)
                    .await?;

                recompute(conn, cart_id).await?;

                Ok::<_, CartError>(item.into())
            })
        })
        .await
    }

    async fn set_item_quantity(
        &self,
        cart_id: i32,
        item_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                lock_cart(conn, cart_id).await?;

                let item: CartItemEntity = diesel::update(
                    cart_items::table
                        .find(item_id)
                        .filter(cart_items::cart_id.eq(cart_id)),
                )
                .set(cart_items::quantity.eq(quantity))
                .returning(CartItemEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?
                .ok_or(CartError::NotFound("Cart item"))?;

                recompute(conn, cart_id).await?;

                Ok::<_, CartError>(item.into())
            })
        })
        .await
    }

    async fn remove_item(&self, cart_id: i32, item_id: i32) -> Result<(), CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                lock_cart(conn, cart_id).await?;

                let deleted = diesel::delete(
                    cart_items::table
                        .find(item_id)
                        .filter(cart_items::cart_id.eq(cart_id)),
                )
                .execute(conn)
                .await?;
                if deleted == 0 {
                    return Err(CartError::NotFound("Cart item"));
                }

                recompute(conn, cart_id).await?;

                Ok::<_, CartError>(())
            })
        })
        .await
    }

    async fn merge_carts(
        &self,
        source_id: i32,
        destination_id: i32,
    ) -> Result<MergeOutcome, CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                // Lock both carts in id order so concurrent merges of the
                // same pair cannot deadlock.
                let locked: Vec<i32> = carts::table
                    .filter(carts::id.eq_any(vec![source_id, destination_id]))
                    .order_by(carts::id.asc())
                    .select(carts::id)
                    .for_update()
                    .load(conn)
                    .await?;

                if !locked.contains(&source_id) {
                    return Ok(MergeOutcome::SourceMissing);
                }
                if !locked.contains(&destination_id) {
                    return Err(CartError::Conflict);
                }

                let source_items: Vec<CartItemEntity> = cart_items::table
                    .filter(cart_items::cart_id.eq(source_id))
                    .order_by(cart_items::id.asc())
                    .select(CartItemEntity::as_select())
                    .load(conn)
                    .await?;

                let (mut moved, mut coalesced) = (0, 0);
                for item in source_items {
                    let summed = diesel::update(
                        cart_items::table
                            .filter(cart_items::cart_id.eq(destination_id))
                            .filter(cart_items::product_id.eq(item.product_id)),
                    )
                    .set(cart_items::quantity.eq(cart_items::quantity + item.quantity))
                    .execute(conn)
                    .await?;

                    if summed > 0 {
                        diesel::delete(cart_items::table.find(item.id))
                            .execute(conn)
                            .await?;
                        coalesced += 1;
                    } else {
                        diesel::update(cart_items::table.find(item.id))
                            .set(cart_items::cart_id.eq(destination_id))
                            .execute(conn)
                            .await?;
                        moved += 1;
                    }
                }

                diesel::delete(carts::table.find(source_id))
                    .execute(conn)
                    .await?;

                let cart = recompute(conn, destination_id).await?;

                Ok::<_, CartError>(MergeOutcome::Merged {
                    cart: Cart::try_from(cart)?,
                    moved,
                    coalesced,
                })
            })
        })
        .await
    }

    async fn recompute_total(&self, cart_id: i32) -> Result<Cart, CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                carts::table
                    .find(cart_id)
                    .select(carts::id)
                    .for_update()
                    .get_result::<i32>(conn)
                    .await
                    .optional()?
                    .ok_or(CartError::NotFound("Cart"))?;

                let cart = recompute(conn, cart_id).await?;
                Ok::<_, CartError>(Cart::try_from(cart)?)
            })
        })
        .await
    }
}
