pub mod entitlement_store;
