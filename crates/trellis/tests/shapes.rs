use anyhow::Result;
use trellis::tensor::{CoordMap, Shape, ShapeError};

#[test]
fn shape_round_trips_dimensions() -> Result<()> {
    let shape = Shape::new(&[3, 2])?;
    assert_eq!(shape.dims(), &[3, 2]);
    assert_eq!(shape.rank(), 2);
    assert_eq!(shape.n_elems(), 6);

    let padded = shape.to_list();
    assert_eq!(padded.len(), 8);
    assert_eq!(&padded[..2], &[3, 2]);
    assert!(padded[2..].iter().all(|&d| d == 1));

    let tall = Shape::new(&[3, 2, 1, 1])?;
    assert_eq!(tall.trimmed(), vec![3, 2]);
    assert_eq!(tall.n_elems(), shape.n_elems());
    Ok(())
}

#[test]
fn shape_reads_one_past_rank() -> Result<()> {
    let shape = Shape::new(&[4, 5])?;
    assert_eq!(shape.at(0), 4);
    assert_eq!(shape.at(1), 5);
    assert_eq!(shape.at(6), 1);
    assert_eq!(Shape::scalar().n_elems(), 1);
    Ok(())
}

#[test]
fn shape_construction_rejects_bad_dims() {
    let overflow = Shape::new(&[2; 9]);
    assert!(matches!(overflow, Err(ShapeError::RankOverflow { got: 9 })));

    let zero = Shape::new(&[3, 0, 2]);
    assert!(matches!(zero, Err(ShapeError::ZeroDimension { .. })));
}

#[test]
fn prefix_compatibility_allows_broadcast() -> Result<()> {
    let a = Shape::new(&[4, 6])?;
    let b = Shape::new(&[1, 6])?;
    let c = Shape::new(&[5, 6])?;
    assert!(a.compatible_before(&b, 2));
    assert!(!a.compatible_before(&c, 2));
    assert!(a.compatible_before(&c, 0));
    Ok(())
}

#[test]
fn suffix_compatibility_is_strict() -> Result<()> {
    let a = Shape::new(&[3, 4, 5])?;
    let b = Shape::new(&[2, 4, 5])?;
    let c = Shape::new(&[3, 4, 5, 1])?;
    assert!(!a.compatible_after(&b, 0));
    assert!(a.compatible_after(&b, 1));
    assert!(a.compatible_after(&c, 0));
    Ok(())
}

#[test]
fn coord_maps_convert_shapes() -> Result<()> {
    let shape = Shape::new(&[3, 4, 5])?;

    let identity = CoordMap::identity();
    assert!(identity.is_identity());
    assert_eq!(identity.convert(&shape).trimmed(), vec![3, 4, 5]);

    let reduced = CoordMap::reduce(1)?;
    assert_eq!(reduced.convert(&shape).trimmed(), vec![4, 5]);

    let extended = CoordMap::extend(2, &[4])?;
    let small = Shape::new(&[3, 2])?;
    assert_eq!(extended.convert(&small).trimmed(), vec![3, 2, 4]);

    let swapped = CoordMap::permute(&[1, 0])?;
    assert_eq!(swapped.convert(&small).trimmed(), vec![2, 3]);
    Ok(())
}

#[test]
fn degenerate_coord_maps_collapse_to_identity() -> Result<()> {
    assert!(CoordMap::reduce(0)?.is_identity());
    assert!(CoordMap::extend(3, &[])?.is_identity());
    assert!(CoordMap::permute(&[])?.is_identity());
    Ok(())
}

#[test]
fn coord_map_construction_rejects_bad_input() {
    assert!(CoordMap::extend(7, &[2, 2]).is_err());
    assert!(CoordMap::extend(1, &[0]).is_err());
    assert!(CoordMap::permute(&[0, 0]).is_err());
    assert!(CoordMap::permute(&[9]).is_err());
}

#[test]
fn composition_is_associative() -> Result<()> {
    let a = CoordMap::permute(&[1, 0])?;
    let b = CoordMap::extend(2, &[3])?;
    let c = CoordMap::permute(&[2, 0, 1])?;

    let left = a.compose(&b).compose(&c);
    let right = a.compose(&b.compose(&c));

    for dims in [vec![2u16, 5], vec![4, 4], vec![7, 1]] {
        let shape = Shape::new(&dims)?;
        assert_eq!(
            left.convert(&shape),
            right.convert(&shape),
            "associativity broke for {shape}"
        );
    }
    Ok(())
}

#[test]
fn composition_chains_transforms() -> Result<()> {
    // swap two axes twice: back to where we started
    let swap = CoordMap::permute(&[1, 0])?;
    let round_trip = swap.compose(&swap);
    let shape = Shape::new(&[3, 7])?;
    assert_eq!(round_trip.convert(&shape).trimmed(), vec![3, 7]);
    Ok(())
}
