//! The CFG interpreter for LIR (spec.md §4.3): a block-stepping machine
//! that executes a region's instructions in order and dispatches its
//! terminator, looping until a terminator hands control back to the
//! caller.
//!
//! Per-run state is exactly what spec.md §4.3 names: a `vars` map local to
//! the region, the document's shared `refCells` (via [`Ctx::refcells`] —
//! spec.md §5's resource table already scopes ref-cells to "all tasks of
//! one document", so a block-node's `assignRef` reaches the same cells an
//! expression-node's `refCell`/`deref` would), the shared effect log, the
//! shared step counter, and a `predecessor` block id used by φ-nodes.
//! `fork`/`join` additionally need a table from the document author's
//! chosen task-id *strings* (spec.md's `ForkBranch.taskId`) to the
//! scheduler's internal [`TaskId`]s; that table is local to one
//! `run_region` call, since a fork and the join/suspend that waits on it
//! are expected to live in the same region (spec.md's examples never
//! thread a forked task id across regions).

use std::collections::HashMap;
use std::sync::Arc;

use spiral_value::{Env, ErrorKind, SpiralError, TaskId, Value};

use crate::cfg::{Block, BlockId, ChannelOp, CfgRegion, Instruction, Terminator};
use crate::channel::{channel_from_value, channel_handle};
use crate::ctx::Ctx;
use crate::eval::eval_node;

/// Caps the number of block visits in a single region run, independent of
/// the global step budget, so a region with an unconditional `jump` cycle
/// but no per-instruction work still terminates (spec.md §4.3: "A per-
/// document cap (on the number of block visits or step count) prevents
/// infinite loops").
const MAX_BLOCK_VISITS: u64 = 1_000_000;

/// Runs `region`'s CFG starting at its declared entry block, returning
/// either the value from a `return`/`exit` terminator or the first error
/// value any instruction produces (spec.md §4.3 step 1: "Any error value
/// produced by an instruction terminates the block with that error").
pub async fn run_region(ctx: &Ctx, outer_env: &Env, region: &CfgRegion) -> Result<Value, SpiralError> {
    run_from(ctx, outer_env, Arc::new(region.clone()), region.entry.clone()).await
}

async fn run_from(
    ctx: &Ctx,
    outer_env: &Env,
    region: Arc<CfgRegion>,
    start: BlockId,
) -> Result<Value, SpiralError> {
    let mut vars: HashMap<String, Value> = HashMap::new();
    let mut named_tasks: HashMap<String, TaskId> = HashMap::new();
    let mut predecessor: Option<BlockId> = None;
    let mut current = start;
    let mut visits = 0u64;

    loop {
        visits += 1;
        if visits > MAX_BLOCK_VISITS {
            return Err(SpiralError::non_termination(format!(
                "exceeded block-visit cap ({MAX_BLOCK_VISITS}) in CFG region"
            )));
        }
        ctx.scheduler.check_global_steps()?;

        let block: &Block = region
            .block(&current)
            .ok_or_else(|| SpiralError::domain_error(format!("no such block {current}")))?;

        if let Some(error_value) =
            run_instructions(ctx, outer_env, &mut vars, &predecessor, &block.instructions).await?
        {
            return Ok(error_value);
        }

        match &block.terminator {
            Terminator::Jump { to } => {
                predecessor = Some(current.clone());
                current = to.clone();
            }
            Terminator::Branch { cond, then, else_ } => {
                let c = lookup_var(&vars, cond)?;
                let b = c
                    .as_bool()
                    .ok_or_else(|| SpiralError::type_error(format!("branch condition must be bool, found {}", c.type_tag())))?;
                predecessor = Some(current.clone());
                current = if b { then.clone() } else { else_.clone() };
            }
            Terminator::Return { value } => {
                return Ok(match value {
                    None => Value::Void,
                    Some(name) => lookup_var(&vars, name)?,
                });
            }
            Terminator::Exit { code } => {
                return Ok(match code {
                    None => Value::Void,
                    Some(name) => lookup_var(&vars, name)?,
                });
            }
            Terminator::Fork { branches, continuation } => {
                for branch in branches {
                    let task_id = TaskId::fresh();
                    named_tasks.insert(branch.task_id.clone(), task_id);
                    let branch_ctx = ctx.with_task(task_id);
                    let branch_env = outer_env.clone();
                    let branch_region = region.clone();
                    let start_block = branch.block.clone();
                    ctx.scheduler.spawn(task_id, async move {
                        Box::pin(run_from(&branch_ctx, &branch_env, branch_region, start_block)).await
                    })?;
                }
                for branch in branches {
                    let task_id = named_tasks[&branch.task_id];
                    let result = ctx.scheduler.await_task(task_id).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                }
                predecessor = Some(current.clone());
                current = continuation.clone();
            }
            Terminator::Join { tasks, results, to } => {
                let mut values = Vec::with_capacity(tasks.len());
                for name in tasks {
                    let task_id = named_tasks.get(name).copied().ok_or_else(|| {
                        SpiralError::domain_error(format!("join of task {name} with no prior fork"))
                    })?;
                    values.push(ctx.scheduler.await_task(task_id).await?);
                }
                if let Some(result_names) = results {
                    if result_names.len() != values.len() {
                        return Err(SpiralError::arity_error(format!(
                            "join expects {} result name(s), got {} task(s)",
                            result_names.len(),
                            values.len()
                        )));
                    }
                    for (name, value) in result_names.iter().zip(values) {
                        vars.insert(name.clone(), value);
                    }
                }
                predecessor = Some(current.clone());
                current = to.clone();
            }
            Terminator::Suspend { future, resume_block } => {
                let f = lookup_var(&vars, future)?;
                let task_id = match &f {
                    Value::Future { task_id, .. } => *task_id,
                    other => {
                        return Err(SpiralError::type_error(format!(
                            "suspend requires a future, found {}",
                            other.type_tag()
                        )))
                    }
                };
                let resolved = ctx.scheduler.await_task(task_id).await?;
                vars.insert(future.clone(), resolved);
                predecessor = Some(current.clone());
                current = resume_block.clone();
            }
        }
    }
}

/// Executes `instructions` in order, mutating `vars` in place. Returns
/// `Ok(Some(error_value))` if an instruction produced an
/// error value (spec.md §4.3: that "terminates the block with that
/// error" — the caller treats it as the whole region's result), `Ok(None)`
/// to fall through to the terminator, or `Err` for a fatal dispatch error
/// (unknown block, exceeded step budget).
async fn run_instructions(
    ctx: &Ctx,
    outer_env: &Env,
    vars: &mut HashMap<String, Value>,
    predecessor: &Option<BlockId>,
    instructions: &[Instruction],
) -> Result<Option<Value>, SpiralError> {
    for instr in instructions {
        ctx.scheduler.check_global_steps()?;
        match instr {
            Instruction::Assign { target, value } => {
                let env = vars_env(outer_env, vars);
                let (v, _) = eval_node(ctx, env, value).await?;
                if v.is_error() {
                    return Ok(Some(v));
                }
                vars.insert(target.clone(), v);
            }
            Instruction::Call { target, callee, args } => {
                let closure = match lookup_var(vars, callee)? {
                    Value::Closure(c) => c,
                    other => {
                        return Err(SpiralError::type_error(format!(
                            "call target {callee} is not a closure, found {}",
                            other.type_tag()
                        )))
                    }
                };
                let arg_values = args.iter().map(|a| lookup_var(vars, a)).collect::<Result<Vec<_>, _>>()?;
                if closure.params.len() != arg_values.len() {
                    return Err(SpiralError::arity_error(format!(
                        "closure expects {} argument(s), got {}",
                        closure.params.len(),
                        arg_values.len()
                    )));
                }
                let mut call_env = closure.env.clone();
                for (param, value) in closure.params.iter().zip(arg_values) {
                    call_env = call_env.extend(param.clone(), value);
                }
                let (v, _) = eval_node(ctx, call_env, &closure.body).await?;
                if v.is_error() {
                    return Ok(Some(v));
                }
                vars.insert(target.clone(), v);
            }
            Instruction::Op { ns, name, target, args } => {
                let record = ctx
                    .operators
                    .get(ns, name)
                    .ok_or_else(|| SpiralError::unknown_operator(ns, name))?;
                let arg_values = args.iter().map(|a| lookup_var(vars, a)).collect::<Result<Vec<_>, _>>()?;
                if record.params.len() != arg_values.len() {
                    return Err(SpiralError::arity_error(format!(
                        "{ns}:{name} expects {} argument(s), got {}",
                        record.params.len(),
                        arg_values.len()
                    )));
                }
                let v = (record.implementation)(&arg_values)?;
                if v.is_error() {
                    return Ok(Some(v));
                }
                vars.insert(target.clone(), v);
            }
            Instruction::Phi { target, sources } => {
                let key = predecessor
                    .as_ref()
                    .and_then(|p| sources.get(&p.0))
                    .ok_or_else(|| SpiralError::domain_error(format!("phi {target}: no source for predecessor")))?;
                let v = lookup_var(vars, key)?;
                vars.insert(target.clone(), v);
            }
            Instruction::Effect { op, args, target } => {
                let arg_values = args.iter().map(|a| lookup_var(vars, a)).collect::<Result<Vec<_>, _>>()?;
                let v = ctx.effects.call(&op.ns, &op.name, &arg_values).await?;
                ctx.effect_log
                    .append(ctx.task_id, crate::registry::OpKey::new(op.ns.clone(), op.name.clone()), arg_values);
                if v.is_error() {
                    return Ok(Some(v));
                }
                vars.insert(target.clone(), v);
            }
            Instruction::AssignRef { target, value } => {
                let env = vars_env(outer_env, vars);
                let (v, _) = eval_node(ctx, env, value).await?;
                if v.is_error() {
                    return Ok(Some(v));
                }
                ctx.refcells.write(target, v);
            }
            Instruction::Spawn { target, task } => {
                let task_id = TaskId::fresh();
                let branch_ctx = ctx.with_task(task_id);
                let env = vars_env(outer_env, vars);
                let task_node = task.clone();
                ctx.scheduler.spawn(task_id, async move {
                    eval_node(&branch_ctx, env, &task_node).await.map(|(v, _)| v)
                })?;
                vars.insert(
                    target.clone(),
                    Value::Future {
                        task_id,
                        status: spiral_value::FutureStatus::Pending,
                    },
                );
            }
            Instruction::ChannelOp(op) => match op {
                ChannelOp::Create { target, buffer_size } => {
                    let capacity = match buffer_size {
                        None => 0usize,
                        Some(id) => {
                            let env = vars_env(outer_env, vars);
                            let (v, _) = eval_node(ctx, env, id).await?;
                            v.as_int()
                                .ok_or_else(|| SpiralError::type_error("channel bufferSize must be int"))?
                                .max(0) as usize
                        }
                    };
                    let channel = ctx.channels.create(capacity);
                    vars.insert(target.clone(), channel_handle(&channel));
                }
                ChannelOp::Send { channel, value } => {
                    let chan = channel_from_value(&lookup_var(vars, channel)?)?;
                    let v = lookup_var(vars, value)?;
                    chan.send(v).await?;
                }
                ChannelOp::Recv { channel, target } => {
                    let chan = channel_from_value(&lookup_var(vars, channel)?)?;
                    let v = chan.recv().await?;
                    vars.insert(target.clone(), v);
                }
                ChannelOp::Close { channel } => {
                    let chan = channel_from_value(&lookup_var(vars, channel)?)?;
                    chan.close().await;
                }
            },
            Instruction::Await { target, future } => {
                let f = lookup_var(vars, future)?;
                let task_id = match f {
                    Value::Future { task_id, .. } => task_id,
                    other => {
                        return Err(SpiralError::type_error(format!(
                            "await requires a future, found {}",
                            other.type_tag()
                        )))
                    }
                };
                let v = ctx.scheduler.await_task(task_id).await?;
                vars.insert(target.clone(), v);
            }
        }
    }
    Ok(None)
}

fn lookup_var(vars: &HashMap<String, Value>, name: &str) -> Result<Value, SpiralError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| SpiralError::new(ErrorKind::DomainError, format!("undefined CFG variable {name}")))
}

/// Builds a transient environment from the block's current locals, layered
/// on top of the document-level environment the region was entered with
/// (spec.md §4.3's note that an expression operand's `var(name)` "sees the
/// CFG's locals").
fn vars_env(outer: &Env, vars: &HashMap<String, Value>) -> Env {
    let mut env = outer.clone();
    for (name, value) in vars {
        env = env.extend(name.clone(), value.clone());
    }
    env
}
