use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::expr::{self, FormulaCache};
use super::frozen;
use super::model::{
    EntryPayload, Formula, M3Breakdown, M3Detail, M3Item, M3Params, M3Variable, M3VariableType,
    Project, UnitItem, VariableRole,
};
use super::round6::round6;
use crate::error::EngineError;

/// Sum of `value * EF * GWP * AF * (1 + uncertaintyPct/100)` across a unit
/// item sequence (ABD/APD/ALD), per §4.5.
pub fn sum_unit_items(items: &[UnitItem]) -> f64 {
    items.iter().map(|i| i.raw_with_uncertainty()).sum()
}

/// Recompute every derived scalar that depends only on a project's stored
/// params (M1's full derived block, M2's `LE`), regardless of methodology.
/// Every `save_project` call site runs this first so derived fields never
/// go stale relative to the params that were just written.
pub fn recompute_derived(project: &mut Project) {
    recompute_m1(project);
    recompute_m2_le(project);
}

/// Recompute M1's derived scalars (`BE/PE/LE/bufferEmission/ER/CAPD/rate`)
/// from its ABD/APD/ALD sequences.
fn recompute_m1(project: &mut Project) {
    let be = sum_unit_items(&project.m1.abd);
    let pe = sum_unit_items(&project.m1.apd);
    let le = sum_unit_items(&project.m1.ald);
    let buffer_emission = (project.m1.buffer_percent / 100.0) * (be - pe - le);
    let er = be - pe - le - buffer_emission;
    let capd: f64 = project.m1.apd.iter().map(|i| i.value).sum();
    let rate = if capd > 0.0 { er / capd } else { 0.0 };

    project.m1.derived.be = round6(be);
    project.m1.derived.pe = round6(pe);
    project.m1.derived.le = round6(le);
    project.m1.derived.buffer_emission = round6(buffer_emission);
    project.m1.derived.er = round6(er);
    project.m1.derived.capd = round6(capd);
    project.m1.derived.emission_reduction_rate = round6(rate);
}

/// Recompute M2's `LE` (identical formula to M1's `LE`, over `m2.ald`).
fn recompute_m2_le(project: &mut Project) {
    project.m2.le = round6(sum_unit_items(&project.m2.ald));
}

/// Inputs submitted for a single write, prior to methodology evaluation.
#[derive(Debug, Clone, Default)]
pub struct EntryInput {
    /// M1: the raw activity value.
    pub input_value: Option<f64>,
    /// M2: submitted realtime/manual bindings.
    pub variables: BTreeMap<String, f64>,
    /// M3: per-item manual values, keyed by item id then variable name.
    pub m3_manual: BTreeMap<String, BTreeMap<String, f64>>,
}

pub struct EvaluationResult {
    pub payload: EntryPayload,
    pub net_reduction: f64,
}

/// Dispatch on `project.methodology`; produce `{netReduction, detail}`.
/// `formulas` maps formula id → `Formula`, pre-loaded by the caller from the
/// repository (M2's `formulaRef.formulaId`, M3's per-item `formulaId`).
pub fn evaluate(
    project: &Project,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    input: &EntryInput,
    timestamp: DateTime<Utc>,
) -> Result<EvaluationResult, EngineError> {
    match project.methodology {
        super::model::Methodology::M1 => evaluate_m1(project, input),
        super::model::Methodology::M2 => evaluate_m2(project, formulas, cache, input, timestamp),
        super::model::Methodology::M3 => evaluate_m3(project, formulas, cache, input),
    }
}

fn evaluate_m1(project: &Project, input: &EntryInput) -> Result<EvaluationResult, EngineError> {
    let input_value = input
        .input_value
        .ok_or_else(|| EngineError::ValidationError("inputValue is required for M1".to_string()))?;
    let rate = project.m1.derived.emission_reduction_rate;
    let net_reduction = round6(input_value * rate);
    Ok(EvaluationResult {
        payload: EntryPayload::M1 {
            input_value,
            emission_reduction_rate: rate,
        },
        net_reduction,
    })
}

fn evaluate_m2(
    project: &Project,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    input: &EntryInput,
    timestamp: DateTime<Utc>,
) -> Result<EvaluationResult, EngineError> {
    let formula_ref = project
        .m2
        .formula_ref
        .as_ref()
        .ok_or_else(|| EngineError::FormulaNotFound("project has no formula configured".to_string()))?;
    let formula = formulas
        .get(&formula_ref.formula_id)
        .ok_or_else(|| EngineError::FormulaNotFound(formula_ref.formula_id.clone()))?;

    let mut binding = input.variables.clone();
    for (symbol, role) in &formula_ref.variable_kinds {
        if *role == VariableRole::Frozen {
            let value = frozen::resolve(formula_ref, symbol, timestamp)?;
            binding.insert(symbol.clone(), value);
        }
    }

    let ast = cache
        .get_or_parse(&formula.id, formula.version, &formula.expression)
        .map_err(|e| EngineError::ValidationError(e.to_string()))?;

    for free in expr::free_identifiers(&ast) {
        if !binding.contains_key(&free) {
            return Err(EngineError::MissingVariable(free));
        }
    }

    let net_in_formula = expr::evaluate(&ast, &binding).map_err(|e| match e {
        expr::EvalError::MissingVariable(n) => EngineError::MissingVariable(n),
    })?;

    let le = project.m2.le;
    let net_reduction = round6(net_in_formula - le);

    Ok(EvaluationResult {
        payload: EntryPayload::M2 {
            formula_id: formula.id.clone(),
            variables: input.variables.clone(),
            net_reduction_in_formula: round6(net_in_formula),
        },
        net_reduction,
    })
}

fn evaluate_m3(
    project: &Project,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    input: &EntryInput,
) -> Result<EvaluationResult, EngineError> {
    let m3 = &project.m3;
    let mut resolved: BTreeMap<String, f64> = BTreeMap::new();

    let baseline = evaluate_m3_group(m3, &m3.baseline, input, formulas, cache, &mut resolved)?;
    let project_group = evaluate_m3_group(m3, &m3.project, input, formulas, cache, &mut resolved)?;
    let leakage = evaluate_m3_group(m3, &m3.leakage, input, formulas, cache, &mut resolved)?;

    let be_total = round6(baseline.iter().map(|(_, v)| v).sum());
    let pe_total = round6(project_group.iter().map(|(_, v)| v).sum());
    let le_total = round6(leakage.iter().map(|(_, v)| v).sum());

    let raw_net = be_total - pe_total - le_total;
    let net_without_uncertainty = round6(raw_net);
    let net_with_uncertainty = round6(raw_net * (1.0 - m3.buffer_percent / 100.0));

    let detail = M3Detail {
        be_total,
        pe_total,
        le_total,
        buffer_percent: m3.buffer_percent,
        net_without_uncertainty,
        net_with_uncertainty,
        breakdown: M3Breakdown {
            baseline,
            project: project_group,
            leakage,
        },
    };

    Ok(EvaluationResult {
        net_reduction: net_with_uncertainty,
        payload: EntryPayload::M3 { detail },
    })
}

fn evaluate_m3_group(
    m3: &M3Params,
    items: &[M3Item],
    input: &EntryInput,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    resolved: &mut BTreeMap<String, f64>,
) -> Result<Vec<(String, f64)>, EngineError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let value = evaluate_m3_item(m3, item, input, formulas, cache, resolved)?;
        resolved.insert(item.id.clone(), value);
        out.push((item.id.clone(), value));
    }
    Ok(out)
}

fn find_item<'a>(m3: &'a M3Params, id: &str) -> Option<&'a M3Item> {
    m3.baseline
        .iter()
        .chain(m3.project.iter())
        .chain(m3.leakage.iter())
        .find(|i| i.id == id)
}

fn evaluate_m3_item(
    m3: &M3Params,
    item: &M3Item,
    input: &EntryInput,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    resolved: &mut BTreeMap<String, f64>,
) -> Result<f64, EngineError> {
    if let Some(v) = resolved.get(&item.id) {
        return Ok(*v);
    }

    let mut binding = BTreeMap::new();
    for var in &item.variables {
        let value = resolve_m3_variable(m3, item, var, input, formulas, cache, resolved)?;
        binding.insert(var.name.clone(), value);
    }

    let formula = formulas
        .get(&item.formula_id)
        .ok_or_else(|| EngineError::FormulaNotFound(item.formula_id.clone()))?;
    let ast = cache
        .get_or_parse(&formula.id, formula.version, &formula.expression)
        .map_err(|e| EngineError::ValidationError(e.to_string()))?;

    for free in expr::free_identifiers(&ast) {
        if !binding.contains_key(&free) {
            return Err(EngineError::MissingVariable(free));
        }
    }

    let value = expr::evaluate(&ast, &binding).map_err(|e| match e {
        expr::EvalError::MissingVariable(n) => EngineError::MissingVariable(n),
    })?;

    Ok(round6(value))
}

fn resolve_m3_variable(
    m3: &M3Params,
    item: &M3Item,
    var: &M3Variable,
    input: &EntryInput,
    formulas: &BTreeMap<String, Formula>,
    cache: &FormulaCache,
    resolved: &mut BTreeMap<String, f64>,
) -> Result<f64, EngineError> {
    match var.kind {
        M3VariableType::Constant => var
            .value
            .ok_or_else(|| EngineError::ValidationError(format!("{}.{} missing constant value", item.id, var.name))),
        M3VariableType::Manual => input
            .m3_manual
            .get(&item.id)
            .and_then(|m| m.get(&var.name))
            .copied()
            .ok_or_else(|| EngineError::MissingManual(item.id.clone(), var.name.clone())),
        M3VariableType::Internal => {
            let mut total = 0.0;
            for source_id in &var.internal_sources {
                let source_item = find_item(m3, source_id)
                    .ok_or_else(|| EngineError::ValidationError(format!("unknown internal source: {source_id}")))?;
                total += evaluate_m3_item(m3, source_item, input, formulas, cache, resolved)?;
            }
            Ok(total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{FormulaVariable, M3Item, M3Variable, M3VariableType, Methodology, ProjectActivity, ProjectMetadata};

    fn formula(id: &str, expression: &str) -> Formula {
        Formula {
            id: id.to_string(),
            name: id.to_string(),
            expression: expression.to_string(),
            variables: vec![
                FormulaVariable { name: "EF_b".into(), default_value: None, unit: None },
                FormulaVariable { name: "EF_p".into(), default_value: None, unit: None },
                FormulaVariable { name: "Q".into(), default_value: None, unit: None },
            ],
            version: 1,
            status: "active".to_string(),
        }
    }

    fn base_project(methodology: super::super::model::Methodology) -> Project {
        Project {
            client_id: "C1".into(),
            project_id: "C1-RED-C1-0001".into(),
            methodology,
            metadata: ProjectMetadata {
                project_name: "Test".into(),
                category: None,
                scope: None,
                location_place: None,
                location_address: None,
                location_lat_lon: None,
            },
            m1: Default::default(),
            m2: Default::default(),
            m3: Default::default(),
            channel: Default::default(),
            is_deleted: false,
        }
    }

    #[test]
    fn s1_m1_basic() {
        let mut p = base_project(Methodology::M1);
        p.m1.derived.emission_reduction_rate = 0.5;
        let input = EntryInput {
            input_value: Some(10.0),
            ..Default::default()
        };
        let result = evaluate_m1(&p, &input).unwrap();
        assert_eq!(result.net_reduction, 5.0);
    }

    #[test]
    fn s5_m3_reduction() {
        let mut p = base_project(Methodology::M3);
        p.m3.project_activity = Some(ProjectActivity::Reduction);
        p.m3.buffer_percent = 0.0;
        p.m3.baseline = vec![M3Item {
            id: "B1".into(),
            label: "baseline".into(),
            formula_id: "EF_b*Q".into(),
            variables: vec![
                M3Variable { name: "EF_b".into(), kind: M3VariableType::Constant, value: Some(2.0), internal_sources: vec![] },
                M3Variable { name: "Q".into(), kind: M3VariableType::Manual, value: None, internal_sources: vec![] },
            ],
        }];
        p.m3.project = vec![M3Item {
            id: "P1".into(),
            label: "project".into(),
            formula_id: "EF_p*Q".into(),
            variables: vec![
                M3Variable { name: "EF_p".into(), kind: M3VariableType::Constant, value: Some(1.0), internal_sources: vec![] },
                M3Variable { name: "Q".into(), kind: M3VariableType::Manual, value: None, internal_sources: vec![] },
            ],
        }];

        let mut manual = BTreeMap::new();
        let mut b1 = BTreeMap::new();
        b1.insert("Q".to_string(), 100.0);
        manual.insert("B1".to_string(), b1);
        let mut p1 = BTreeMap::new();
        p1.insert("Q".to_string(), 100.0);
        manual.insert("P1".to_string(), p1);

        let mut formulas = BTreeMap::new();
        formulas.insert("EF_b*Q".to_string(), formula("EF_b*Q", "EF_b*Q"));
        formulas.insert("EF_p*Q".to_string(), formula("EF_p*Q", "EF_p*Q"));

        let input = EntryInput { m3_manual: manual, ..Default::default() };
        let result = evaluate_m3(&p, &formulas, &FormulaCache::new(), &input).unwrap();
        if let EntryPayload::M3 { detail } = result.payload {
            assert_eq!(detail.be_total, 200.0);
            assert_eq!(detail.pe_total, 100.0);
            assert_eq!(detail.le_total, 0.0);
            assert_eq!(detail.net_without_uncertainty, 100.0);
            assert_eq!(detail.net_with_uncertainty, 100.0);
        } else {
            panic!("expected M3 payload");
        }
        assert_eq!(result.net_reduction, 100.0);
    }

    #[test]
    fn s6_m3_removal_with_buffer() {
        let mut p = base_project(Methodology::M3);
        p.m3.project_activity = Some(ProjectActivity::Removal);
        p.m3.buffer_percent = 10.0;
        p.m3.baseline = vec![M3Item {
            id: "B1".into(),
            label: "baseline".into(),
            formula_id: "EF_b*Q".into(),
            variables: vec![
                M3Variable { name: "EF_b".into(), kind: M3VariableType::Constant, value: Some(2.0), internal_sources: vec![] },
                M3Variable { name: "Q".into(), kind: M3VariableType::Manual, value: None, internal_sources: vec![] },
            ],
        }];
        p.m3.project = vec![M3Item {
            id: "P1".into(),
            label: "project".into(),
            formula_id: "EF_p*Q".into(),
            variables: vec![
                M3Variable { name: "EF_p".into(), kind: M3VariableType::Constant, value: Some(1.0), internal_sources: vec![] },
                M3Variable { name: "Q".into(), kind: M3VariableType::Manual, value: None, internal_sources: vec![] },
            ],
        }];
        let mut manual = BTreeMap::new();
        manual.insert("B1".to_string(), BTreeMap::from([("Q".to_string(), 100.0)]));
        manual.insert("P1".to_string(), BTreeMap::from([("Q".to_string(), 100.0)]));
        let mut formulas = BTreeMap::new();
        formulas.insert("EF_b*Q".to_string(), formula("EF_b*Q", "EF_b*Q"));
        formulas.insert("EF_p*Q".to_string(), formula("EF_p*Q", "EF_p*Q"));
        let input = EntryInput { m3_manual: manual, ..Default::default() };
        let result = evaluate_m3(&p, &formulas, &FormulaCache::new(), &input).unwrap();
        assert_eq!(result.net_reduction, 90.0);
    }
}
