use std::sync::Arc;

use anyhow::Result;
use tensor_graph::{
    CpuRuntime, DataType, Element, Error, ExecutionEngine, ExecutionOptions, Graph, OperatorId,
    OperatorKind, TensorId,
};

fn graph() -> Result<Graph> {
    Ok(Graph::new(Arc::new(CpuRuntime::new()))?)
}

fn output(graph: &Graph, op: OperatorId) -> TensorId {
    graph.operator(op).unwrap().output()
}

fn fill<T: Element>(graph: &mut Graph, id: TensorId, values: &[T]) -> Result<()> {
    graph.tensor_mut(id).unwrap().copy_from_slice(values)?;
    Ok(())
}

fn run(graph: &Graph) -> Result<()> {
    ExecutionEngine::new(ExecutionOptions::new())?.run(graph)?;
    Ok(())
}

#[test]
fn test_element_wise_chain() -> Result<()> {
    let mut graph = graph()?;
    let a = graph.add_tensor(vec![2, 3], DataType::Float32);
    let b = graph.add_tensor(vec![3], DataType::Float32);
    let c = graph.add_tensor(vec![2, 1], DataType::Float32);
    let sum = graph.add_operator(OperatorKind::add(), &[a, b], None)?;
    let product = graph.add_operator(OperatorKind::mul(), &[output(&graph, sum), c], None)?;
    let diff = graph.add_operator(OperatorKind::sub(), &[output(&graph, product), b], None)?;
    let quotient = graph.add_operator(OperatorKind::div(), &[output(&graph, diff), c], None)?;

    graph.data_malloc()?;
    fill(&mut graph, a, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    fill(&mut graph, b, &[1.0f32, 1.0, 1.0])?;
    fill(&mut graph, c, &[2.0f32, 4.0])?;
    run(&graph)?;

    let product = graph.tensor(output(&graph, product)).unwrap().to_vec::<f32>()?;
    assert_eq!(product, vec![4.0, 6.0, 8.0, 20.0, 24.0, 28.0]);
    let quotient = graph.tensor(output(&graph, quotient)).unwrap().to_vec::<f32>()?;
    assert_eq!(quotient, vec![1.5, 2.5, 3.5, 4.75, 5.75, 6.75]);
    Ok(())
}

#[test]
fn test_integer_division_by_zero_fails() -> Result<()> {
    let mut graph = graph()?;
    let a = graph.add_tensor(vec![2], DataType::Int32);
    let b = graph.add_tensor(vec![2], DataType::Int32);
    graph.add_operator(OperatorKind::div(), &[a, b], None)?;
    graph.data_malloc()?;
    fill(&mut graph, a, &[4i32, 6])?;
    fill(&mut graph, b, &[2i32, 0])?;

    let result = ExecutionEngine::new(ExecutionOptions::new())?.run(&graph);
    assert!(matches!(result, Err(Error::ExecutionError(_))));
    Ok(())
}

#[test]
fn test_matmul_with_transpose_flags() -> Result<()> {
    let mut graph = graph()?;
    // a is stored as [k, m], b as [n, k]
    let a = graph.add_tensor(vec![3, 2], DataType::Float64);
    let b = graph.add_tensor(vec![2, 3], DataType::Float64);
    let matmul = graph.add_operator(OperatorKind::matmul(true, true), &[a, b], None)?;
    assert_eq!(graph.tensor(output(&graph, matmul)).unwrap().shape(), &[2, 2]);

    graph.data_malloc()?;
    fill(&mut graph, a, &[1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0])?;
    fill(&mut graph, b, &[7.0f64, 9.0, 11.0, 8.0, 10.0, 12.0])?;
    run(&graph)?;

    // [[1,2,3],[4,5,6]] x [[7,8],[9,10],[11,12]]
    let c = graph.tensor(output(&graph, matmul)).unwrap().to_vec::<f64>()?;
    assert_eq!(c, vec![58.0, 64.0, 139.0, 154.0]);
    Ok(())
}

#[test]
fn test_batched_matmul_broadcasts_operand() -> Result<()> {
    let mut graph = graph()?;
    let a = graph.add_tensor(vec![2, 1, 2], DataType::Int64);
    let b = graph.add_tensor(vec![2, 2], DataType::Int64);
    let matmul = graph.add_operator(OperatorKind::matmul(false, false), &[a, b], None)?;

    graph.data_malloc()?;
    fill(&mut graph, a, &[1i64, 2, 3, 4])?;
    fill(&mut graph, b, &[1i64, 0, 0, 1])?;
    run(&graph)?;

    let c = graph.tensor(output(&graph, matmul)).unwrap().to_vec::<i64>()?;
    assert_eq!(c, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_transpose_and_concat() -> Result<()> {
    let mut graph = graph()?;
    let x = graph.add_tensor(vec![2, 3], DataType::Int32);
    let y = graph.add_tensor(vec![3, 1], DataType::Int32);
    let t = graph.add_operator(OperatorKind::transpose(vec![1, 0]), &[x], None)?;
    let concat = graph.add_operator(OperatorKind::concat(-1), &[output(&graph, t), y], None)?;
    assert_eq!(graph.tensor(output(&graph, concat)).unwrap().shape(), &[3, 3]);

    graph.data_malloc()?;
    fill(&mut graph, x, &[1i32, 2, 3, 4, 5, 6])?;
    fill(&mut graph, y, &[7i32, 8, 9])?;
    run(&graph)?;

    let t = graph.tensor(output(&graph, t)).unwrap().to_vec::<i32>()?;
    assert_eq!(t, vec![1, 4, 2, 5, 3, 6]);
    let c = graph.tensor(output(&graph, concat)).unwrap().to_vec::<i32>()?;
    assert_eq!(c, vec![1, 4, 7, 2, 5, 8, 3, 6, 9]);
    Ok(())
}

#[test]
fn test_relu_clip_and_cast() -> Result<()> {
    let mut graph = graph()?;
    let x = graph.add_tensor(vec![5], DataType::Float32);
    let relu = graph.add_operator(OperatorKind::relu(), &[x], None)?;
    let clip = graph.add_operator(OperatorKind::clip(Some(-1.0), Some(2.0)), &[x], None)?;
    let cast = graph.add_operator(
        OperatorKind::cast(DataType::Int32),
        &[output(&graph, clip)],
        None,
    )?;

    graph.data_malloc()?;
    fill(&mut graph, x, &[-3.0f32, -0.5, 0.0, 1.5, 7.0])?;
    run(&graph)?;

    let relu = graph.tensor(output(&graph, relu)).unwrap().to_vec::<f32>()?;
    assert_eq!(relu, vec![0.0, 0.0, 0.0, 1.5, 7.0]);
    let clip = graph.tensor(output(&graph, clip)).unwrap().to_vec::<f32>()?;
    assert_eq!(clip, vec![-1.0, -0.5, 0.0, 1.5, 2.0]);
    let cast = graph.tensor(output(&graph, cast)).unwrap().to_vec::<i32>()?;
    assert_eq!(cast, vec![-1, 0, 0, 1, 2]);
    Ok(())
}

#[test]
fn test_cast_out_of_range_fails() -> Result<()> {
    let mut graph = graph()?;
    let x = graph.add_tensor(vec![2], DataType::Int32);
    graph.add_operator(OperatorKind::cast(DataType::UInt32), &[x], None)?;
    graph.data_malloc()?;
    fill(&mut graph, x, &[1i32, -1])?;

    let result = ExecutionEngine::new(ExecutionOptions::new())?.run(&graph);
    assert!(matches!(result, Err(Error::ExecutionError(_))));
    Ok(())
}

#[test]
fn test_optimized_graph_computes_same_result() -> Result<()> {
    let build = |optimize: bool| -> Result<Vec<f32>> {
        let mut graph = graph()?;
        let a = graph.add_tensor(vec![3, 2], DataType::Float32);
        let b = graph.add_tensor(vec![3, 2], DataType::Float32);
        let t = graph.add_operator(OperatorKind::transpose(vec![1, 0]), &[a], None)?;
        let matmul = graph.add_operator(OperatorKind::matmul(false, false), &[output(&graph, t), b], None)?;
        let c = output(&graph, matmul);
        if optimize {
            assert_eq!(graph.optimize()?.total_optimizations, 1);
        }

        graph.data_malloc()?;
        fill(&mut graph, a, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])?;
        fill(&mut graph, b, &[1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0])?;
        run(&graph)?;
        Ok(graph.tensor(c).unwrap().to_vec::<f32>()?)
    };

    let plain = build(false)?;
    assert_eq!(plain, vec![6.0, 8.0, 8.0, 10.0]);
    assert_eq!(build(true)?, plain);
    Ok(())
}
