use crate::fetch::{FetchStrategy, FetchStyle, FetchTiming};

use super::FetchDecision;

/// Fetch strategy an association gets from its mapping and the influencers
///
/// A `join fetch` of the exact path or an enabled fetch profile naming the
/// association forces an eager join. Otherwise the mapping decides, with a
/// lazily mapped join falling back to a select and selects becoming batch
/// fetches when a batch size above one applies.
pub fn determine_fetch_plan(decision: &FetchDecision<'_>) -> FetchStrategy {
    let influencers = decision.influencers;

    if influencers.join_fetch_paths.contains(decision.navigable_path) {
        return FetchStrategy::EAGER_JOIN;
    }

    if let Some(owner) = decision.owner_entity {
        let profile = influencers
            .enabled_fetch_profiles
            .iter()
            .filter_map(|name| decision.metamodel.fetch_profile(name))
            .find(|profile| profile.has_fetch(owner, decision.owner_path));
        if let Some(profile) = profile {
            tracing::trace!(
                "Fetch profile `{}` joins {}",
                profile.name,
                decision.navigable_path
            );
            return FetchStrategy::EAGER_JOIN;
        }
    }

    let mapping = decision.association.fetch;
    let batch_size = mapping.batch_size.or(influencers.batch_size).unwrap_or(1);
    let select_style = if batch_size > 1 {
        FetchStyle::Batch
    } else {
        FetchStyle::Select
    };

    if mapping.lazy {
        let style = match mapping.style {
            FetchStyle::Join | FetchStyle::Select => select_style,
            other => other,
        };
        return FetchStrategy::new(FetchTiming::Delayed, style);
    }

    let style = match mapping.style {
        FetchStyle::Select => select_style,
        other => other,
    };
    FetchStrategy::new(FetchTiming::Immediate, style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::LoadQueryInfluencers;
    use crate::metamodel::{AttributeDefinition, FetchMapping, FetchProfile, Metamodel};
    use crate::navigable_path::NavigablePath;

    fn decide(
        attribute: &AttributeDefinition,
        influencers: &LoadQueryInfluencers,
        metamodel: &Metamodel,
    ) -> FetchStrategy {
        let path = NavigablePath::new("Order").append(&attribute.name);
        determine_fetch_plan(&FetchDecision {
            attribute,
            association: attribute.association().unwrap(),
            owner_entity: Some("Order"),
            owner_path: &attribute.name,
            navigable_path: &path,
            influencers,
            metamodel,
            circular: false,
        })
    }

    fn customer() -> AttributeDefinition {
        AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"])
    }

    #[test]
    fn test_mapping_decides_by_default() {
        let metamodel = Metamodel::new();
        let influencers = LoadQueryInfluencers::new();

        let joined = customer().with_fetch(FetchMapping::join());
        assert_eq!(decide(&joined, &influencers, &metamodel), FetchStrategy::EAGER_JOIN);

        let lazy = customer().with_fetch(FetchMapping::lazy());
        assert_eq!(decide(&lazy, &influencers, &metamodel), FetchStrategy::DELAYED_SELECT);

        let selected = customer().with_fetch(FetchMapping::select());
        assert_eq!(decide(&selected, &influencers, &metamodel), FetchStrategy::IMMEDIATE_SELECT);
    }

    #[test]
    fn test_lazy_join_mapping_falls_back_to_select() {
        let metamodel = Metamodel::new();
        let influencers = LoadQueryInfluencers::new();
        let mapping = FetchMapping {
            lazy: true,
            ..FetchMapping::join()
        };
        let attribute = customer().with_fetch(mapping);
        assert_eq!(decide(&attribute, &influencers, &metamodel), FetchStrategy::DELAYED_SELECT);
    }

    #[test]
    fn test_batch_size_upgrades_select() {
        let metamodel = Metamodel::new();
        let influencers = LoadQueryInfluencers::new().with_batch_size(16);
        let attribute = customer().with_fetch(FetchMapping::select());
        assert_eq!(
            decide(&attribute, &influencers, &metamodel),
            FetchStrategy::new(FetchTiming::Immediate, FetchStyle::Batch)
        );

        // a batch size of one is a plain select
        let attribute = customer().with_fetch(FetchMapping::select().with_batch_size(1));
        assert_eq!(decide(&attribute, &influencers, &metamodel), FetchStrategy::IMMEDIATE_SELECT);
    }

    #[test]
    fn test_enabled_profile_forces_join() {
        let metamodel = Metamodel::new()
            .with_fetch_profile(FetchProfile::new("with-customer").with_fetch("Order", "customer"));
        let attribute = customer().with_fetch(FetchMapping::lazy());

        let influencers = LoadQueryInfluencers::new();
        assert_eq!(decide(&attribute, &influencers, &metamodel), FetchStrategy::DELAYED_SELECT);

        let influencers = LoadQueryInfluencers::new().with_fetch_profile("with-customer");
        assert_eq!(decide(&attribute, &influencers, &metamodel), FetchStrategy::EAGER_JOIN);
    }

    #[test]
    fn test_join_fetch_path_forces_join() {
        let metamodel = Metamodel::new();
        let influencers = LoadQueryInfluencers::new()
            .with_join_fetch_path(NavigablePath::new("Order").append("customer"));
        let attribute = customer().with_fetch(FetchMapping::lazy());
        assert_eq!(decide(&attribute, &influencers, &metamodel), FetchStrategy::EAGER_JOIN);
    }
}
