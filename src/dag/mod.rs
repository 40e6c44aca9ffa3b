//! # Módulo de DAG - Resolução de Dependências e Ordenação
//!
//! Este módulo transforma o conjunto de steps de uma suíte em uma ordem
//! de execução determinística que respeita o grafo de dependências.
//!
//! ## Para todos entenderem:
//!
//! Cada step pode declarar "eu dependo do step X". O conjunto dessas
//! arestas forma um DAG (grafo direcionado acíclico). A ordenação
//! topológica garante que todo produtor roda antes dos seus consumidores.
//!
//! Quando mais de um step está pronto ao mesmo tempo, o desempate é o
//! `sort_order` definido pelo usuário (menor primeiro). Isso torna a
//! ordem estável entre execuções.
//!
//! ## Ordenações oferecidas:
//!
//! - **Completa**: todos os steps da suíte, com steps somente-dependência
//!   filtrados da ordem final (eles são materializados sob demanda).
//! - **Subgrafo**: a partir de um step alvo, apenas o fecho transitivo de
//!   predecessores. É o prefixo mínimo para executar o alvo.
//!
//! Ciclos são rejeitados na gravação da suíte; em tempo de execução a
//! ordenação ainda checa aciclicidade defensivamente e devolve erro
//! fatal se a invariante foi violada.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::errors::EngineError;
use crate::model::{Environment, TestStep, TestSuite};

// ============================================================================
// EXECUÇÃO PREPARADA
// ============================================================================

/// Tudo que o executor de suíte precisa, resolvido de uma vez: ordem de
/// execução, mapa de steps e ambiente. Imutável durante a execução.
#[derive(Debug, Clone)]
pub struct PreparedExecution {
    pub suite_id: i64,
    pub suite_name: String,
    pub environment: Arc<Environment>,
    /// Ordem topológica sem os steps somente-dependência.
    pub execution_order: Vec<i64>,
    /// Todos os steps da suíte, inclusive somente-dependência.
    pub step_map: Arc<HashMap<i64, Arc<TestStep>>>,
}

/// Valida e prepara a execução completa de uma suíte.
pub fn prepare(suite: &TestSuite, environment: Environment) -> Result<PreparedExecution, EngineError> {
    environment.validate()?;
    validate_suite(suite)?;
    let order = full_order(&suite.steps)?;
    Ok(assemble(suite, environment, order, true))
}

/// Valida e prepara o prefixo mínimo para executar `target_step_id`.
pub fn prepare_subgraph(
    suite: &TestSuite,
    environment: Environment,
    target_step_id: i64,
) -> Result<PreparedExecution, EngineError> {
    environment.validate()?;
    validate_suite(suite)?;
    let order = subgraph_order(&suite.steps, target_step_id)?;
    // No subgrafo tudo é pré-requisito do alvo, então nada é filtrado.
    Ok(assemble(suite, environment, order, false))
}

fn assemble(
    suite: &TestSuite,
    environment: Environment,
    order: Vec<i64>,
    filter_dependency_only: bool,
) -> PreparedExecution {
    let step_map: HashMap<i64, Arc<TestStep>> = suite
        .steps
        .iter()
        .map(|s| (s.id, Arc::new(s.clone())))
        .collect();

    let execution_order = if filter_dependency_only {
        order
            .into_iter()
            .filter(|id| step_map.get(id).is_some_and(|s| !s.dependency_only))
            .collect()
    } else {
        order
    };

    PreparedExecution {
        suite_id: suite.id,
        suite_name: suite.name.clone(),
        environment: Arc::new(environment),
        execution_order,
        step_map: Arc::new(step_map),
    }
}

// ============================================================================
// GRAFO
// ============================================================================

/// Constrói o mapa step → conjunto de predecessores.
pub fn build_graph(steps: &[TestStep]) -> HashMap<i64, HashSet<i64>> {
    let mut graph: HashMap<i64, HashSet<i64>> = HashMap::new();
    for step in steps {
        let preds = graph.entry(step.id).or_default();
        for dep in &step.dependencies {
            preds.insert(dep.depends_on_step_id);
        }
    }
    graph
}

// ============================================================================
// ORDENAÇÃO COMPLETA (KAHN)
// ============================================================================

/// Ordenação topológica de todos os steps (algoritmo de Kahn).
///
/// A fila de prontos é um min-heap chaveado por `(sort_order, id)`, o que
/// dá uma ordem determinística que respeita o DAG e desempata pelo
/// sort_order do usuário.
pub fn full_order(steps: &[TestStep]) -> Result<Vec<i64>, EngineError> {
    let graph = build_graph(steps);
    kahn(steps, &graph, None)
}

/// Ordenação do subgrafo de predecessores (reflexivo-transitivo) do alvo.
pub fn subgraph_order(steps: &[TestStep], target_step_id: i64) -> Result<Vec<i64>, EngineError> {
    if !steps.iter().any(|s| s.id == target_step_id) {
        return Err(EngineError::NotFound {
            kind: "step",
            name: target_step_id.to_string(),
        });
    }

    let graph = build_graph(steps);

    // Busca em largura sobre as arestas de dependência, partindo do alvo.
    let mut subset: HashSet<i64> = HashSet::new();
    let mut queue: VecDeque<i64> = VecDeque::new();
    subset.insert(target_step_id);
    queue.push_back(target_step_id);
    while let Some(current) = queue.pop_front() {
        if let Some(preds) = graph.get(&current) {
            for pred in preds {
                if subset.insert(*pred) {
                    queue.push_back(*pred);
                }
            }
        }
    }

    kahn(steps, &graph, Some(&subset))
}

/// Kahn sobre o conjunto (ou subconjunto) de steps.
fn kahn(
    steps: &[TestStep],
    graph: &HashMap<i64, HashSet<i64>>,
    subset: Option<&HashSet<i64>>,
) -> Result<Vec<i64>, EngineError> {
    let included = |id: i64| subset.map_or(true, |s| s.contains(&id));
    let sort_orders: HashMap<i64, i32> = steps.iter().map(|s| (s.id, s.sort_order)).collect();

    // Grau de entrada e lista de sucessores, restritos ao subconjunto.
    // Arestas para fora do conjunto de steps são ignoradas (a validação
    // de gravação já as rejeita).
    let mut indegree: HashMap<i64, usize> = HashMap::new();
    let mut successors: HashMap<i64, Vec<i64>> = HashMap::new();
    for step in steps {
        if !included(step.id) {
            continue;
        }
        let preds = graph.get(&step.id);
        let mut degree = 0;
        if let Some(preds) = preds {
            for pred in preds {
                if included(*pred) && sort_orders.contains_key(pred) {
                    degree += 1;
                    successors.entry(*pred).or_default().push(step.id);
                }
            }
        }
        indegree.insert(step.id, degree);
    }

    // Min-heap de prontos, chaveado por (sort_order, id).
    let mut ready: BinaryHeap<Reverse<(i32, i64)>> = BinaryHeap::new();
    for (id, degree) in &indegree {
        if *degree == 0 {
            ready.push(Reverse((*sort_orders.get(id).unwrap_or(&0), *id)));
        }
    }

    let mut order = Vec::with_capacity(indegree.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        if let Some(deps) = successors.get(&id) {
            for dependent in deps {
                let degree = indegree
                    .get_mut(dependent)
                    .expect("dependent sempre presente no mapa de graus");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((
                        *sort_orders.get(dependent).unwrap_or(&0),
                        *dependent,
                    )));
                }
            }
        }
    }

    if order.len() != indegree.len() {
        return Err(EngineError::validation(
            "Dependency graph contains a cycle and cannot be ordered",
        ));
    }

    Ok(order)
}

// ============================================================================
// VALIDAÇÃO DE GRAVAÇÃO
// ============================================================================

/// Valida as invariantes estruturais de uma suíte.
///
/// - ids de step únicos
/// - nenhum step depende de si mesmo
/// - toda dependência aponta para um step da mesma suíte
/// - o grafo é acíclico
pub fn validate_suite(suite: &TestSuite) -> Result<(), EngineError> {
    let mut ids: HashSet<i64> = HashSet::new();
    for step in &suite.steps {
        if !ids.insert(step.id) {
            return Err(EngineError::validation(format!(
                "Duplicate step id {} in suite '{}'",
                step.id, suite.name
            )));
        }
        if step.suite_id != suite.id {
            return Err(EngineError::validation(format!(
                "Step '{}' belongs to suite {} but was saved under suite {}",
                step.name, step.suite_id, suite.id
            )));
        }
    }

    for step in &suite.steps {
        for dep in &step.dependencies {
            if dep.depends_on_step_id == step.id {
                return Err(EngineError::validation(format!(
                    "Step '{}' cannot depend on itself",
                    step.name
                )));
            }
            if !ids.contains(&dep.depends_on_step_id) {
                return Err(EngineError::validation(format!(
                    "Step '{}' depends on step {} which does not exist in suite '{}'",
                    step.name, dep.depends_on_step_id, suite.name
                )));
            }
        }
    }

    if has_cycle(&build_graph(&suite.steps)) {
        return Err(EngineError::validation(format!(
            "Dependency cycle detected in suite '{}'",
            suite.name
        )));
    }

    Ok(())
}

/// Checa se adicionar novas dependências a um step criaria um ciclo.
///
/// Usada pela operação de gravação: em caso de ciclo nada é mutado e o
/// chamador recebe o erro.
pub fn validate_new_dependencies(
    steps: &[TestStep],
    step_id: i64,
    new_dependency_ids: &[i64],
) -> Result<(), EngineError> {
    if new_dependency_ids.contains(&step_id) {
        return Err(EngineError::validation(
            "Adding these dependencies would create a circular dependency",
        ));
    }

    let mut graph = build_graph(steps);
    let preds = graph.entry(step_id).or_default();
    for dep in new_dependency_ids {
        preds.insert(*dep);
    }

    if has_cycle(&graph) {
        return Err(EngineError::validation(
            "Adding these dependencies would create a circular dependency",
        ));
    }

    Ok(())
}

/// Detecção de ciclo por DFS com coloração de nós.
///
/// Branco (ausente) = não visitado, cinza (1) = em processamento,
/// preto (2) = concluído. Encontrar um nó cinza durante a descida
/// significa ciclo.
fn has_cycle(graph: &HashMap<i64, HashSet<i64>>) -> bool {
    let mut color: HashMap<i64, u8> = HashMap::new();

    for node in graph.keys() {
        if !color.contains_key(node) && dfs_finds_cycle(*node, graph, &mut color) {
            return true;
        }
    }
    false
}

fn dfs_finds_cycle(node: i64, graph: &HashMap<i64, HashSet<i64>>, color: &mut HashMap<i64, u8>) -> bool {
    color.insert(node, 1);
    if let Some(preds) = graph.get(&node) {
        for pred in preds {
            match color.get(pred) {
                Some(1) => return true,
                Some(_) => {}
                None => {
                    if dfs_finds_cycle(*pred, graph, color) {
                        return true;
                    }
                }
            }
        }
    }
    color.insert(node, 2);
    false
}

// ============================================================================
// TESTES
// ============================================================================
