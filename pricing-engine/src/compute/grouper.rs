use super::Disposition;
use crate::types::*;
use std::collections::HashMap;

/// The 8-attribute grouping key for one modifier, given its resolved tax
/// setting.
pub fn group_key_for(m: &FrozenModifier, resolved_tax_setting: ResolvedTaxSetting) -> GroupKey {
    GroupKey {
        resolved_tax_setting,
        kind: m.kind,
        category: m.category,
        affects_quantity: m.affects_quantity,
        cost_percentage: m.cost_percentage.as_ref().map(|v| v.to_string()),
        display_mode: m.display_mode.clone(),
        application_type: m.application_type,
        product_id: m.product_id.clone().unwrap_or_else(|| "null".to_string()),
    }
}

/// Collapse modifiers with an identical 8-attribute key into one [`Group`],
/// summing their values additively.
pub fn group_modifiers(
    input: &FrozenInput,
    dispositions: &HashMap<ModifierId, Disposition>,
    resolved: &HashMap<ModifierId, ResolvedTaxSetting>,
) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for m in &input.modifiers {
        if dispositions.get(&m.id) != Some(&Disposition::Accepted) {
            continue;
        }
        let tax_setting = resolved.get(&m.id).copied().unwrap_or(ResolvedTaxSetting::Taxable);
        let key = group_key_for(m, tax_setting);

        if let Some(&idx) = index.get(&key) {
            groups[idx].modifier_ids.push(m.id.clone());
            groups[idx].combined_value += &m.value;
        } else {
            index.insert(key.clone(), groups.len());
            groups.push(Group {
                key,
                modifier_ids: vec![m.id.clone()],
                combined_value: m.value.clone(),
            });
        }
    }

    groups
}

/// Sort groups into the deterministic application order of spec 4.3.6:
/// cohort by application type, then category, then kind, then minimum
/// chain priority, then created-at ascending, then the group key
/// lexicographically.
pub fn order_groups(input: &FrozenInput, groups: &[Group]) -> Vec<Group> {
    let min_priority_and_created = |group: &Group| -> (i64, String) {
        let mut min_priority = i64::MAX;
        let mut min_created = String::new();
        for id in &group.modifier_ids {
            if let Some(m) = input.modifiers.iter().find(|m| &m.id == id) {
                if m.chain_priority < min_priority {
                    min_priority = m.chain_priority;
                }
                if min_created.is_empty() || m.created_at < min_created {
                    min_created = m.created_at.clone();
                }
            }
        }
        (min_priority, min_created)
    };

    let mut sortable: Vec<(Group, i64, String)> = groups
        .iter()
        .cloned()
        .map(|g| {
            let (priority, created) = min_priority_and_created(&g);
            (g, priority, created)
        })
        .collect();

    sortable.sort_by(|(a, a_priority, a_created), (b, b_priority, b_created)| {
        a.key
            .application_type
            .cmp(&b.key.application_type)
            .then(a.key.category.cmp(&b.key.category))
            .then(a.key.kind.cmp(&b.key.kind))
            .then(a_priority.cmp(b_priority))
            .then(a_created.cmp(b_created))
            .then_with(|| group_key_lexical(&a.key).cmp(&group_key_lexical(&b.key)))
    });

    sortable.into_iter().map(|(g, _, _)| g).collect()
}

fn group_key_lexical(key: &GroupKey) -> String {
    serde_json::to_string(key).unwrap_or_default()
}
