use loppis_core::{Requester, Role};

use crate::error::FulfillmentError;
use crate::models::Order;

/// What the requester wants to do with an order's fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Book shipments: the order's seller or an admin.
    Manage,
    /// Read shipments and refresh tracking: buyer, seller or admin.
    View,
    /// Confirm receipt: the buyer or an admin.
    Receive,
}

/// Role-only part of [`authorize`], usable before the order is loaded.
pub fn require_role(requester: &Requester, access: Access) -> Result<(), FulfillmentError> {
    let allowed = match access {
        Access::Manage => matches!(requester.role, Role::Seller | Role::Admin),
        Access::View => true,
        Access::Receive => matches!(requester.role, Role::Buyer | Role::Admin),
    };
    if allowed {
        Ok(())
    } else {
        Err(FulfillmentError::Authorization(format!(
            "role {} may not {:?} order fulfillment",
            requester.role, access
        )))
    }
}

/// Single authorization check for every fulfillment operation.
pub fn authorize(requester: &Requester, order: &Order, access: Access) -> Result<(), FulfillmentError> {
    require_role(requester, access)?;
    if requester.is_admin() {
        return Ok(());
    }

    let user = requester.user_id.as_str();
    let permitted = match access {
        Access::Manage => order.is_seller(user),
        Access::View => order.buyer_id == user || order.is_seller(user),
        Access::Receive => order.buyer_id == user,
    };
    if permitted {
        Ok(())
    } else {
        Err(FulfillmentError::Authorization(format!(
            "user {} has no access to order {}",
            user, order.id
        )))
    }
}
