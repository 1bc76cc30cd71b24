// Table opcodes
// JOIN and WHERE, delegated to the session's table engine

use crate::error::{VmError, VmResult};
use crate::vm::context::{Flow, InstructionContext};
use crate::vm::value::{Table, Value};

fn pop_table(ctx: &mut InstructionContext<'_>) -> VmResult<std::sync::Arc<Table>> {
    match ctx.pop()? {
        Value::Table(table) => Ok(table),
        other => Err(VmError::type_mismatch(format!(
            "{} is not a TABLE",
            other.type_name()
        ))),
    }
}

/// ( left right -- joined ) inner join on the operand column
pub fn join(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let column = ctx.name()?;
    let right = pop_table(ctx)?;
    let left = pop_table(ctx)?;
    let joined = ctx.session.services().tables().join(&left, &right, &column)?;
    ctx.push(joined);
    Ok(Flow::Next)
}

/// ( table value -- rows )
pub fn filter(ctx: &mut InstructionContext<'_>) -> VmResult<Flow> {
    let column = ctx.name()?;
    let value = ctx.pop()?;
    let table = pop_table(ctx)?;
    let rows = ctx.session.services().tables().filter(&table, &column, &value)?;
    ctx.push(rows);
    Ok(Flow::Next)
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::ops::testing::run;
    use crate::vm::Value;
    use pretty_assertions::assert_eq;

    const PEOPLE: &str = r#"
                PUSHI 1
                PUSHS "ann"
                MKARRAY 2
                PUSHI 2
                PUSHS "bob"
                MKARRAY 2
                MKARRAY 2
                MKTABLE "ID,NAME"
    "#;

    #[test]
    fn test_join_on_shared_column() {
        let source = format!(
            r#"
            .PROGRAM MAIN
                {PEOPLE}
                PUSHI 2
                PUSHS "admin"
                MKARRAY 2
                MKARRAY 1
                MKTABLE "ID,ROLE"
                JOIN "ID"
                DUP
                COLUMNS
                SWAP
                LENGTH
                MKARRAY 2
                RETURN 1
            "#
        );
        let (result, _) = run(&source);
        let value = result.unwrap().result.unwrap();
        let columns = Value::array(vec![Value::from("ID"), Value::from("NAME"), Value::from("ROLE")]);
        assert_eq!(value, Value::array(vec![columns, Value::from(1)]));
    }

    #[test]
    fn test_where_filters_rows() {
        let source = format!(
            r#"
            .PROGRAM MAIN
                {PEOPLE}
                PUSHS "bob"
                WHERE "NAME"
                LENGTH
                RETURN 1
            "#
        );
        let (result, _) = run(&source);
        assert_eq!(result.unwrap().result, Some(Value::from(1)));
    }

    #[test]
    fn test_unknown_column() {
        let source = format!(".PROGRAM MAIN\n{PEOPLE}\n PUSHI 1\n WHERE \"AGE\"\n");
        let (result, _) = run(&source);
        assert!(result.unwrap_err().is(ErrorKind::NoMember));
    }
}
