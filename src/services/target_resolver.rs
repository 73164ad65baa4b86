use crate::{
    config::{CatalogConfig, CatalogEntry},
    error::{IapError, IapResult},
    models::target::{ClientTarget, EntitlementTarget},
};

/// Maps vendor product ids to entitlements using the operator catalog.
pub struct EntitlementTargetResolver {
    catalog: CatalogConfig,
}

impl EntitlementTargetResolver {
    pub fn new(catalog: CatalogConfig) -> Self {
        Self { catalog }
    }

    /// The SKU decides what is granted. A client target only binds a boost to
    /// a listing and is ignored for every other kind of product.
    pub fn resolve(
        &self,
        product_id: &str,
        client_target: Option<&ClientTarget>,
    ) -> IapResult<EntitlementTarget> {
        if let CatalogEntry::Top { duration_days } = self.entry(product_id)? {
            let target = client_target.ok_or_else(|| {
                IapError::InvalidTarget(format!(
                    "Product {} requires a listing target",
                    product_id
                ))
            })?;
            return self.bind_top(*duration_days, target);
        }
        self.resolve_catalog(product_id)
    }

    /// Resolution from the SKU alone, for receipts without a stored target.
    /// Boosts cannot be resolved this way.
    pub fn resolve_catalog(&self, product_id: &str) -> IapResult<EntitlementTarget> {
        match self.entry(product_id)? {
            CatalogEntry::Responses { quantity } => Ok(EntitlementTarget::Responses {
                quantity: *quantity,
            }),
            CatalogEntry::Subscription { plan, months } => Ok(EntitlementTarget::Subscription {
                plan: plan.clone(),
                months: *months,
            }),
            CatalogEntry::Business { seats } => Ok(EntitlementTarget::Business { seats: *seats }),
            CatalogEntry::Top { .. } => Err(IapError::InvalidTarget(format!(
                "Listing binding for {} is unknown",
                product_id
            ))),
        }
    }

    fn entry(&self, product_id: &str) -> IapResult<&CatalogEntry> {
        self.catalog
            .products
            .get(product_id)
            .ok_or_else(|| IapError::UnsupportedProduct(product_id.to_string()))
    }

    fn bind_top(&self, duration_days: u32, target: &ClientTarget) -> IapResult<EntitlementTarget> {
        if !self
            .catalog
            .top_listing_types
            .iter()
            .any(|allowed| allowed == &target.listing_type)
        {
            return Err(IapError::InvalidTarget(format!(
                "Listing type {:?} cannot be boosted",
                target.listing_type
            )));
        }

        if target.listing_id <= 0 {
            return Err(IapError::InvalidTarget(format!(
                "Invalid listing id {}",
                target.listing_id
            )));
        }

        if let Some(requested) = target.duration_days {
            if requested != duration_days {
                return Err(IapError::InvalidTarget(format!(
                    "Duration {} does not match the product's {} days",
                    requested, duration_days
                )));
            }
        }

        Ok(EntitlementTarget::Top {
            listing_type: target.listing_type.clone(),
            listing_id: target.listing_id,
            duration_days,
        })
    }
}
